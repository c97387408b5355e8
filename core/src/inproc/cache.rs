use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::PersistenceError;
use crate::persistence::{
    CacheHandle, CacheMode, CachePlatform, LeaseError, OpenError, TabId, TabOwnershipLease,
};
use crate::remote::RemoteEntity;
use crate::util::lock;

type EntityMap = Arc<Mutex<BTreeMap<String, RemoteEntity>>>;

/// Shared storage of one simulated browser profile. Every clone is another
/// tab looking at the same leases and cache contents.
#[derive(Clone)]
pub struct InProcessCachePlatform {
    shared: Arc<SharedStorage>,
}

struct SharedStorage {
    multi_owner: bool,
    single_owner: bool,
    leases: Mutex<HashMap<String, TabOwnershipLease>>,
    stores: Mutex<HashMap<String, EntityMap>>,
    open_failure: Mutex<Option<OpenError>>,
}

impl Default for InProcessCachePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessCachePlatform {
    /// Single-owner storage only, arbitrated by the lease.
    pub fn new() -> Self {
        Self::with_capabilities(false, true)
    }

    pub fn with_multi_owner() -> Self {
        Self::with_capabilities(true, true)
    }

    /// A platform that exposes no shared-storage capability at all.
    pub fn without_shared_storage() -> Self {
        Self::with_capabilities(false, false)
    }

    pub fn with_capabilities(multi_owner: bool, single_owner: bool) -> Self {
        Self {
            shared: Arc::new(SharedStorage {
                multi_owner,
                single_owner,
                leases: Mutex::new(HashMap::new()),
                stores: Mutex::new(HashMap::new()),
                open_failure: Mutex::new(None),
            }),
        }
    }

    /// Another tab on the same profile.
    pub fn tab(&self) -> Self {
        self.clone()
    }

    /// Make every subsequent `open_shared` fail with `error`.
    pub fn fail_open(&self, error: OpenError) {
        *lock(&self.shared.open_failure) = Some(error);
    }

    pub fn lease_holder(&self, namespace: &str) -> Option<TabOwnershipLease> {
        lock(&self.shared.leases).get(namespace).cloned()
    }

    pub fn cached(&self, namespace: &str, key: &str) -> Option<RemoteEntity> {
        let store = lock(&self.shared.stores).get(namespace).cloned()?;
        let entries = lock(&store);
        entries.get(key).cloned()
    }

    fn store(&self, namespace: &str) -> EntityMap {
        lock(&self.shared.stores)
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl CachePlatform for InProcessCachePlatform {
    fn supports(&self, mode: CacheMode) -> bool {
        match mode {
            CacheMode::MultiOwner => self.shared.multi_owner,
            CacheMode::SingleOwner => self.shared.single_owner,
        }
    }

    async fn open_shared(
        &self,
        namespace: &str,
        mode: CacheMode,
    ) -> Result<Arc<dyn CacheHandle>, OpenError> {
        if let Some(err) = lock(&self.shared.open_failure).clone() {
            return Err(err);
        }
        if !self.supports(mode) {
            return Err(OpenError::Unsupported);
        }
        Ok(Arc::new(InProcessCache {
            mode,
            entries: self.store(namespace),
        }))
    }

    async fn acquire_lease(
        &self,
        namespace: &str,
        holder: &TabId,
        ttl: Duration,
    ) -> Result<TabOwnershipLease, LeaseError> {
        let now = Utc::now();
        let mut leases = lock(&self.shared.leases);
        let granted = match leases.get(namespace) {
            None => TabOwnershipLease::new(namespace, holder.clone(), ttl, now),
            Some(current) if &current.holder == holder => current.renewed_at(now),
            Some(current) if current.is_expired_at(now) => {
                tracing::info!(
                    target: "tabsync.inproc",
                    namespace,
                    previous = %current.holder,
                    holder = %holder,
                    "taking over abandoned lease"
                );
                TabOwnershipLease::succeed(current, holder.clone(), ttl, now)
            }
            Some(current) => {
                return Err(LeaseError::Busy {
                    holder: current.holder.to_string(),
                })
            }
        };
        leases.insert(namespace.to_string(), granted.clone());
        Ok(granted)
    }

    async fn renew_lease(&self, lease: &TabOwnershipLease) -> Result<TabOwnershipLease, LeaseError> {
        let mut leases = lock(&self.shared.leases);
        match leases.get(&lease.namespace) {
            Some(current) if current.is_same_grant(lease) => {
                let renewed = current.renewed_at(Utc::now());
                leases.insert(lease.namespace.clone(), renewed.clone());
                Ok(renewed)
            }
            Some(current) => Err(LeaseError::Lost(format!(
                "now held by {}",
                current.holder
            ))),
            None => Err(LeaseError::Lost("lease released".into())),
        }
    }

    async fn release_lease(&self, lease: &TabOwnershipLease) -> Result<(), LeaseError> {
        let mut leases = lock(&self.shared.leases);
        if leases
            .get(&lease.namespace)
            .is_some_and(|current| current.is_same_grant(lease))
        {
            leases.remove(&lease.namespace);
        }
        Ok(())
    }
}

pub struct InProcessCache {
    mode: CacheMode,
    entries: EntityMap,
}

#[async_trait]
impl CacheHandle for InProcessCache {
    fn mode(&self) -> CacheMode {
        self.mode
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntity>, PersistenceError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn put(&self, key: &str, entity: RemoteEntity) -> Result<(), PersistenceError> {
        lock(&self.entries).insert(key.to_string(), entity);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    async fn entry_count(&self) -> Result<usize, PersistenceError> {
        Ok(lock(&self.entries).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_tab_is_busy_until_release() {
        let tab_a = InProcessCachePlatform::new();
        let tab_b = tab_a.tab();
        let ttl = Duration::from_secs(30);

        let lease = tab_a.acquire_lease("demo", &TabId::from("a"), ttl).await.unwrap();
        let err = tab_b
            .acquire_lease("demo", &TabId::from("b"), ttl)
            .await
            .unwrap_err();
        assert_eq!(err, LeaseError::Busy { holder: "a".into() });

        tab_a.release_lease(&lease).await.unwrap();
        let taken = tab_b.acquire_lease("demo", &TabId::from("b"), ttl).await.unwrap();
        assert_eq!(taken.holder, TabId::from("b"));
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over_and_old_holder_loses_it() {
        let tab_a = InProcessCachePlatform::new();
        let tab_b = tab_a.tab();
        let short = Duration::from_millis(30);

        let old = tab_a.acquire_lease("demo", &TabId::from("a"), short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let new = tab_b
            .acquire_lease("demo", &TabId::from("b"), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(new.epoch, old.epoch + 1);
        assert!(matches!(
            tab_a.renew_lease(&old).await,
            Err(LeaseError::Lost(_))
        ));
    }

    #[tokio::test]
    async fn capabilities_gate_open() {
        let platform = InProcessCachePlatform::without_shared_storage();
        assert!(matches!(
            platform.open_shared("demo", CacheMode::SingleOwner).await,
            Err(OpenError::Unsupported)
        ));

        let platform = InProcessCachePlatform::with_multi_owner();
        let handle = platform.open_shared("demo", CacheMode::MultiOwner).await.unwrap();
        handle
            .put(
                "k",
                RemoteEntity {
                    value: serde_json::json!({"v": 1}),
                    version: 1,
                    updated_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(platform.cached("demo", "k").map(|e| e.version), Some(1));
    }
}
