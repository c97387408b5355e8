use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{ConnectionConfig, ConnectionKey};
use crate::error::{ConnectionError, RemoteError, ServiceKind};
use crate::remote::{
    AuthSession, BlobStore, ChangeEvent, ChangeKind, ChangeStream, DocumentStore, RemoteConnector,
    RemoteEntity, SubscriptionTarget, WriteCondition,
};
use crate::util::lock;

const CHANGE_BUFFER: usize = 256;

/// Shared in-memory backend. Clones observe the same data.
#[derive(Clone)]
pub struct InProcessRemote {
    state: Arc<RemoteState>,
}

struct RemoteState {
    entities: Mutex<BTreeMap<String, RemoteEntity>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_version: AtomicU64,
    changes: broadcast::Sender<ChangeEvent>,
    reachable: AtomicBool,
    injected: Mutex<VecDeque<RemoteError>>,
    denied: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    connect_attempts: Mutex<HashMap<&'static str, usize>>,
    connect_failures: Mutex<Vec<ServiceKind>>,
    connect_delay: Mutex<Option<Duration>>,
    requests: AtomicUsize,
}

impl Default for InProcessRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Arc::new(RemoteState {
                entities: Mutex::new(BTreeMap::new()),
                blobs: Mutex::new(HashMap::new()),
                next_version: AtomicU64::new(1),
                changes,
                reachable: AtomicBool::new(true),
                injected: Mutex::new(VecDeque::new()),
                denied: Mutex::new(Vec::new()),
                applied: Mutex::new(Vec::new()),
                connect_attempts: Mutex::new(HashMap::new()),
                connect_failures: Mutex::new(Vec::new()),
                connect_delay: Mutex::new(None),
                requests: AtomicUsize::new(0),
            }),
        }
    }

    pub fn connector(&self) -> InProcessConnector {
        InProcessConnector {
            remote: self.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<RemoteEntity> {
        lock(&self.state.entities).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.state.entities).keys().cloned().collect()
    }

    /// Keys of accepted writes and deletes, in the order they landed.
    pub fn applied(&self) -> Vec<String> {
        lock(&self.state.applied).clone()
    }

    /// Out-of-band edit, as if another client wrote. Returns the new version.
    pub fn insert(&self, key: &str, value: Value) -> u64 {
        self.store(key, value)
    }

    /// Out-of-band delete.
    pub fn remove(&self, key: &str) -> bool {
        let removed = lock(&self.state.entities).remove(key).is_some();
        if removed {
            self.publish(key, ChangeKind::Deleted);
        }
        removed
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next document calls with `error`, one call per entry.
    pub fn inject_failure(&self, error: RemoteError) {
        lock(&self.state.injected).push_back(error);
    }

    /// Writes and deletes on `key` answer PermissionDenied.
    pub fn deny(&self, key: &str) {
        lock(&self.state.denied).push(key.to_string());
    }

    pub fn fail_connect(&self, service: ServiceKind) {
        lock(&self.state.connect_failures).push(service);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.state.connect_delay) = Some(delay);
    }

    pub fn connect_attempts(&self, service: ServiceKind) -> usize {
        lock(&self.state.connect_attempts)
            .get(service_label(service))
            .copied()
            .unwrap_or(0)
    }

    /// Document calls seen so far, including failed ones.
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    fn store(&self, key: &str, value: Value) -> u64 {
        let version = self.state.next_version.fetch_add(1, Ordering::SeqCst);
        let entity = RemoteEntity {
            value,
            version,
            updated_at: Some(Utc::now()),
        };
        lock(&self.state.entities).insert(key.to_string(), entity.clone());
        self.publish(key, ChangeKind::Upserted(entity));
        version
    }

    fn publish(&self, key: &str, change: ChangeKind) {
        // No subscribers is fine.
        let _ = self.state.changes.send(ChangeEvent {
            key: key.to_string(),
            change,
        });
    }

    fn admit(&self) -> Result<(), RemoteError> {
        self.state.requests.fetch_add(1, Ordering::SeqCst);
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("remote unreachable".into()));
        }
        match lock(&self.state.injected).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_allowed(&self, key: &str) -> Result<(), RemoteError> {
        if lock(&self.state.denied).iter().any(|k| k == key) {
            return Err(RemoteError::PermissionDenied(format!("write to {key} denied")));
        }
        Ok(())
    }

    async fn connect(&self, service: ServiceKind) -> Result<(), ConnectionError> {
        *lock(&self.state.connect_attempts)
            .entry(service_label(service))
            .or_insert(0) += 1;
        let delay = *lock(&self.state.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.state.connect_failures).contains(&service) {
            return Err(ConnectionError::new(service, "in-process connect refused"));
        }
        Ok(())
    }
}

fn service_label(service: ServiceKind) -> &'static str {
    match service {
        ServiceKind::Auth => "auth",
        ServiceKind::Documents => "documents",
        ServiceKind::Blobs => "blobs",
    }
}

#[derive(Clone)]
pub struct InProcessConnector {
    remote: InProcessRemote,
}

impl InProcessConnector {
    pub fn remote(&self) -> &InProcessRemote {
        &self.remote
    }
}

#[async_trait]
impl RemoteConnector for InProcessConnector {
    async fn connect_auth(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn AuthSession>, ConnectionError> {
        self.remote.connect(ServiceKind::Auth).await?;
        Ok(Arc::new(InProcessAuth {
            domain: config.get(ConnectionKey::AuthDomain).unwrap_or_default().to_string(),
        }))
    }

    async fn connect_documents(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DocumentStore>, ConnectionError> {
        self.remote.connect(ServiceKind::Documents).await?;
        let namespace = config.project_id().ok_or_else(|| {
            ConnectionError::new(ServiceKind::Documents, "projectId missing")
        })?;
        Ok(Arc::new(InProcessDocuments {
            namespace: namespace.to_string(),
            remote: self.remote.clone(),
        }))
    }

    async fn connect_blobs(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn BlobStore>, ConnectionError> {
        self.remote.connect(ServiceKind::Blobs).await?;
        Ok(Arc::new(InProcessBlobs {
            bucket: config.get(ConnectionKey::StorageBucket).unwrap_or_default().to_string(),
            remote: self.remote.clone(),
        }))
    }
}

struct InProcessAuth {
    domain: String,
}

#[async_trait]
impl AuthSession for InProcessAuth {
    fn auth_domain(&self) -> &str {
        &self.domain
    }

    async fn current_user(&self) -> Result<Option<String>, RemoteError> {
        Ok(None)
    }
}

struct InProcessDocuments {
    namespace: String,
    remote: InProcessRemote,
}

#[async_trait]
impl DocumentStore for InProcessDocuments {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn read_entity(&self, key: &str) -> Result<RemoteEntity, RemoteError> {
        self.remote.admit()?;
        self.remote
            .get(key)
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn write_entity(
        &self,
        key: &str,
        value: Value,
        condition: WriteCondition,
    ) -> Result<u64, RemoteError> {
        self.remote.admit()?;
        self.remote.check_allowed(key)?;
        if !value.is_object() {
            return Err(RemoteError::Rejected(format!("{key}: value must be an object")));
        }

        let actual = self.remote.get(key).map(|e| e.version);
        let satisfied = match condition {
            WriteCondition::Any => true,
            WriteCondition::Absent => actual.is_none(),
            WriteCondition::Version(v) => actual == Some(v),
        };
        if !satisfied {
            return Err(RemoteError::VersionConflict {
                key: key.to_string(),
                expected: condition.expected_version(),
                actual,
            });
        }

        let version = self.remote.store(key, value);
        lock(&self.remote.state.applied).push(key.to_string());
        Ok(version)
    }

    async fn delete_entity(&self, key: &str) -> Result<(), RemoteError> {
        self.remote.admit()?;
        self.remote.check_allowed(key)?;
        if !self.remote.remove(key) {
            return Err(RemoteError::NotFound(key.to_string()));
        }
        lock(&self.remote.state.applied).push(key.to_string());
        Ok(())
    }

    fn subscribe(&self, target: SubscriptionTarget) -> ChangeStream {
        let state = Arc::clone(&self.remote.state);
        Box::pin(async_stream::stream! {
            // Subscribed on first poll, not on call.
            let mut rx = state.changes.subscribe();
            drop(state);
            loop {
                match rx.recv().await {
                    Ok(event) if target.matches(&event.key) => {
                        yield event;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(target: "tabsync.inproc", missed, "change subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

struct InProcessBlobs {
    bucket: String,
    remote: InProcessRemote,
}

#[async_trait]
impl BlobStore for InProcessBlobs {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.remote.admit()?;
        lock(&self.remote.state.blobs).insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.remote.admit()?;
        lock(&self.remote.state.blobs)
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new()
            .with(ConnectionKey::ProjectId, "demo")
            .with(ConnectionKey::AuthDomain, "demo.example.com")
            .with(ConnectionKey::StorageBucket, "demo-bucket")
    }

    #[tokio::test]
    async fn conditional_writes() {
        let remote = InProcessRemote::new();
        let docs = remote.connector().connect_documents(&config()).await.unwrap();
        assert_eq!(docs.namespace(), "demo");

        let v1 = docs
            .write_entity("a", json!({"n": 1}), WriteCondition::Absent)
            .await
            .unwrap();
        let err = docs
            .write_entity("a", json!({"n": 2}), WriteCondition::Absent)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::VersionConflict { actual: Some(v), .. } if v == v1));

        let v2 = docs
            .write_entity("a", json!({"n": 2}), WriteCondition::Version(v1))
            .await
            .unwrap();
        assert!(v2 > v1);
        assert_eq!(docs.read_entity("a").await.unwrap().value, json!({"n": 2}));
    }

    #[tokio::test]
    async fn unreachable_and_denied() {
        let remote = InProcessRemote::new();
        let docs = remote.connector().connect_documents(&config()).await.unwrap();

        remote.set_reachable(false);
        assert!(docs.read_entity("a").await.unwrap_err().is_transient());
        remote.set_reachable(true);

        remote.deny("secret");
        let err = docs
            .write_entity("secret", json!({}), WriteCondition::Any)
            .await
            .unwrap_err();
        assert!(err.is_durable_rejection());
    }

    #[tokio::test]
    async fn subscription_filters_by_prefix() {
        let remote = InProcessRemote::new();
        let docs = remote.connector().connect_documents(&config()).await.unwrap();
        let mut stream = docs.subscribe(SubscriptionTarget::Prefix("users/".into()));

        let poll = tokio::spawn(async move { stream.next().await });
        // Let the stream subscribe before publishing.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        remote.insert("orders/1", json!({}));
        remote.insert("users/1", json!({"name": "x"}));

        let event = poll.await.unwrap().unwrap();
        assert_eq!(event.key, "users/1");
    }

    #[tokio::test]
    async fn connect_failure_is_reported_per_service() {
        let remote = InProcessRemote::new();
        remote.fail_connect(ServiceKind::Blobs);
        let err = match remote.connector().connect_blobs(&config()).await {
            Err(e) => e,
            Ok(_) => panic!("blob connect should fail"),
        };
        assert_eq!(err.service, ServiceKind::Blobs);
        assert_eq!(remote.connect_attempts(ServiceKind::Blobs), 1);
        assert_eq!(remote.connect_attempts(ServiceKind::Auth), 0);
    }
}
