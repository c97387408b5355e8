use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, ConnectionConfig};
use crate::connectivity::ConnectionMonitor;
use crate::error::{BootstrapError, QueueError};
use crate::persistence::{CachePlatform, PersistenceCoordinator, PersistenceSettings, TabId};
use crate::queue::{EnqueueOutcome, LocalMutationQueue, Operation};
use crate::registry::{ServiceHandles, ServiceRegistry};
use crate::remote::{RemoteConnector, RemoteEntity, SubscriptionTarget};
use crate::replication::{BackoffPolicy, DrainReport, ReplicationEngine};
use crate::state::{ReadinessSignal, ReadinessState, SyncState, SyncStateHub};
use crate::util::lock;

/// Concrete backends chosen for this process.
#[derive(Clone)]
pub struct Backends {
    pub connector: Arc<dyn RemoteConnector>,
    /// `None` when the host offers no shared-storage primitive.
    pub platform: Option<Arc<dyn CachePlatform>>,
}

#[async_trait::async_trait]
pub trait BackendFactory: Send + Sync {
    async fn build_backends(&self, cfg: &AppConfig) -> anyhow::Result<Backends>;
}

/// Everything one tab needs to talk to the remote store while offline-tolerant.
pub struct SyncContext {
    cfg: AppConfig,
    registry: Arc<ServiceRegistry>,
    queue: Arc<LocalMutationQueue>,
    monitor: Arc<ConnectionMonitor>,
    sync_state: SyncStateHub,
    engine: OnceLock<Arc<ReplicationEngine>>,
    engine_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncContext {
    pub fn new(cfg: AppConfig, backends: Backends) -> Result<Self, QueueError> {
        let queue = match cfg.sync.queue_path.as_deref() {
            Some(path) if !path.trim().is_empty() => {
                LocalMutationQueue::open_slot(path, cfg.sync.compact_threshold)?
            }
            _ => LocalMutationQueue::in_memory(),
        };
        Ok(Self::with_queue(cfg, backends, queue))
    }

    pub fn with_queue(cfg: AppConfig, backends: Backends, queue: LocalMutationQueue) -> Self {
        let persistence = Arc::new(PersistenceCoordinator::new(
            backends.platform,
            PersistenceSettings::from(&cfg.persistence),
            TabId::generate(),
        ));
        let registry = Arc::new(ServiceRegistry::new(backends.connector, persistence));
        let monitor = Arc::new(ConnectionMonitor::new(cfg.sync.assume_online));
        Self {
            cfg,
            registry,
            queue: Arc::new(queue),
            monitor,
            sync_state: SyncStateHub::new(),
            engine: OnceLock::new(),
            engine_task: Mutex::new(None),
        }
    }

    pub async fn from_factory(cfg: AppConfig, factory: &dyn BackendFactory) -> anyhow::Result<Self> {
        let backends = factory.build_backends(&cfg).await?;
        Ok(Self::new(cfg, backends)?)
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    /// Bootstraps once; replication starts as soon as the handles exist.
    pub async fn bootstrap(&self, connection: ConnectionConfig) -> ReadinessState {
        let state = self.registry.bootstrap(connection).await;
        match &state {
            ReadinessState::Ready(handles) => self.start_engine(handles),
            ReadinessState::Failed(err) => {
                self.sync_state.set(SyncState::Error(err.to_string()));
            }
            ReadinessState::Pending => {}
        }
        state
    }

    pub async fn await_ready(&self) -> Result<ServiceHandles, BootstrapError> {
        self.registry.readiness().wait_ready().await
    }

    pub fn readiness(&self) -> ReadinessSignal {
        self.registry.readiness()
    }

    /// Queues a write; replay is nudged right away when online.
    pub fn enqueue_write(&self, key: &str, op: Operation, payload: Value) -> Result<u64, QueueError> {
        self.enqueue_write_at(key, op, payload, None)
            .map(|outcome| outcome.seq())
    }

    /// Like `enqueue_write`, recording the remote version the caller last read.
    pub fn enqueue_write_at(
        &self,
        key: &str,
        op: Operation,
        payload: Value,
        base_version: Option<u64>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let outcome = self.queue.enqueue_with_base(key, op, payload, base_version)?;
        self.nudge_if_online();
        Ok(outcome)
    }

    /// Queues a write made on top of `base`, the entity as the caller last read it.
    ///
    /// The touched fields' values in `base` decide, at replay, which fields a
    /// later remote edit gets to keep.
    pub fn enqueue_write_based_on(
        &self,
        key: &str,
        op: Operation,
        payload: Value,
        base: &RemoteEntity,
    ) -> Result<EnqueueOutcome, QueueError> {
        let outcome = self.queue.enqueue_based_on(key, op, payload, base)?;
        self.nudge_if_online();
        Ok(outcome)
    }

    fn nudge_if_online(&self) {
        if self.monitor.is_online() {
            if let Some(engine) = self.engine.get() {
                engine.nudge();
            }
        }
    }

    pub fn on_sync_state_change<F>(&self, listener: F)
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.sync_state.on_change(listener);
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state.current()
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<LocalMutationQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn persistence(&self) -> &Arc<PersistenceCoordinator> {
        self.registry.persistence()
    }

    pub fn engine(&self) -> Option<Arc<ReplicationEngine>> {
        self.engine.get().cloned()
    }

    /// Drains in the caller's task. `None` before bootstrap reached Ready.
    pub async fn drain(&self) -> Result<Option<DrainReport>, QueueError> {
        match self.engine() {
            Some(engine) => engine.drain().await.map(Some),
            None => Ok(None),
        }
    }

    /// Mirror remote changes under `target` into the local cache.
    pub fn follow(&self, target: SubscriptionTarget) -> bool {
        match self.engine.get() {
            Some(engine) => {
                engine.follow(target);
                true
            }
            None => false,
        }
    }

    /// Stops replication and hands back the cache lease. Queued writes stay on disk.
    pub async fn shutdown(&self) {
        if let Some(engine) = self.engine.get() {
            engine.stop();
        }
        let task = lock(&self.engine_task).take();
        if let Some(task) = task {
            task.abort();
        }
        self.persistence().release().await;
        tracing::info!(
            target: "tabsync.context",
            pending = self.queue.len(),
            "sync context shut down"
        );
    }

    fn start_engine(&self, handles: &ServiceHandles) {
        let mut started = false;
        let engine = self.engine.get_or_init(|| {
            started = true;
            Arc::new(ReplicationEngine::new(
                Arc::clone(handles.documents()),
                Arc::clone(&self.queue),
                Arc::clone(&self.monitor),
                self.sync_state.clone(),
                Arc::clone(self.registry.persistence()),
                BackoffPolicy::from(&self.cfg.sync),
            ))
        });
        if !started {
            return;
        }

        if let Some(task) = engine.spawn(self.monitor.subscribe()) {
            *lock(&self.engine_task) = Some(task);
        }
        tracing::info!(
            target: "tabsync.context",
            stage = "replication.start",
            pending = self.queue.len(),
            online = self.monitor.is_online(),
            "replication engine started"
        );
        if !self.queue.is_empty() && self.monitor.is_online() {
            engine.nudge();
        }
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.engine_task).take() {
            task.abort();
        }
    }
}
