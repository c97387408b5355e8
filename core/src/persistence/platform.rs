use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::lease::{TabId, TabOwnershipLease};
use crate::error::PersistenceError;
use crate::remote::RemoteEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Platform coordinates concurrent tabs on one cache.
    MultiOwner,
    /// One tab at a time, arbitrated by the lease.
    SingleOwner,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::MultiOwner => write!(f, "multi_owner"),
            CacheMode::SingleOwner => write!(f, "single_owner"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("cache mode not supported")]
    Unsupported,
    #[error("cache opened by another tab ({})", .holder.as_deref().unwrap_or("unknown"))]
    Contended { holder: Option<String> },
    #[error("cache open failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("lease held by {holder}")]
    Busy { holder: String },
    #[error("lease no longer held: {0}")]
    Lost(String),
    #[error("lease storage failed: {0}")]
    Failed(String),
}

/// Shared-storage capability provided by the host platform.
#[async_trait]
pub trait CachePlatform: Send + Sync {
    fn supports(&self, mode: CacheMode) -> bool;

    async fn open_shared(
        &self,
        namespace: &str,
        mode: CacheMode,
    ) -> Result<Arc<dyn CacheHandle>, OpenError>;

    /// Grants the lease when it is free or its holder stopped heartbeating.
    async fn acquire_lease(
        &self,
        namespace: &str,
        holder: &TabId,
        ttl: Duration,
    ) -> Result<TabOwnershipLease, LeaseError>;

    /// Returns the renewed lease; `LeaseError::Lost` when someone else owns it now.
    async fn renew_lease(&self, lease: &TabOwnershipLease) -> Result<TabOwnershipLease, LeaseError>;

    async fn release_lease(&self, lease: &TabOwnershipLease) -> Result<(), LeaseError>;
}

/// An opened local cache. Writes are only issued while the tab owns it.
#[async_trait]
pub trait CacheHandle: Send + Sync {
    fn mode(&self) -> CacheMode;

    async fn get(&self, key: &str) -> Result<Option<RemoteEntity>, PersistenceError>;

    async fn put(&self, key: &str, entity: RemoteEntity) -> Result<(), PersistenceError>;

    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    async fn entry_count(&self) -> Result<usize, PersistenceError>;
}
