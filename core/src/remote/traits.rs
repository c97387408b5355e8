use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::types::{ChangeStream, RemoteEntity, SubscriptionTarget, WriteCondition};
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, RemoteError};

/// Session client for the identity service. Credential exchange happens elsewhere.
#[async_trait]
pub trait AuthSession: Send + Sync {
    fn auth_domain(&self) -> &str;

    /// Currently signed-in user id, if any.
    async fn current_user(&self) -> Result<Option<String>, RemoteError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Project the store is scoped to; also names the local cache instance.
    fn namespace(&self) -> &str;

    /// `RemoteError::NotFound` when the key does not exist.
    async fn read_entity(&self, key: &str) -> Result<RemoteEntity, RemoteError>;

    /// Returns the version assigned to the write.
    async fn write_entity(
        &self,
        key: &str,
        value: Value,
        condition: WriteCondition,
    ) -> Result<u64, RemoteError>;

    async fn delete_entity(&self, key: &str) -> Result<(), RemoteError>;

    fn subscribe(&self, target: SubscriptionTarget) -> ChangeStream;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> Result<(), RemoteError>;

    async fn get_blob(&self, path: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Opens the three sub-service connections. The registry calls each at most
/// once per process.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect_auth(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn AuthSession>, ConnectionError>;

    async fn connect_documents(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DocumentStore>, ConnectionError>;

    async fn connect_blobs(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn BlobStore>, ConnectionError>;
}
