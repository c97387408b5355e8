//! Owns the one set of remote connections for this process.
//!
//! Construction is guarded by a `OnceCell`: concurrent `bootstrap` calls
//! collapse into a single in-flight attempt and every caller gets the same
//! terminal [`ReadinessState`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::handles::ServiceHandles;
use crate::config::{ConfigValidator, ConnectionConfig};
use crate::error::BootstrapError;
use crate::persistence::{PersistenceCoordinator, PersistenceOutcome};
use crate::remote::RemoteConnector;
use crate::state::{ReadinessSignal, ReadinessState};

pub struct ServiceRegistry {
    connector: Arc<dyn RemoteConnector>,
    persistence: Arc<PersistenceCoordinator>,
    signal: ReadinessSignal,
    init: OnceCell<ReadinessState>,
    attempts: AtomicUsize,
}

impl ServiceRegistry {
    pub fn new(connector: Arc<dyn RemoteConnector>, persistence: Arc<PersistenceCoordinator>) -> Self {
        Self {
            connector,
            persistence,
            signal: ReadinessSignal::new(),
            init: OnceCell::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Idempotent. Only the first call's configuration is used; later and
    /// concurrent callers observe the first call's result.
    pub async fn bootstrap(&self, config: ConnectionConfig) -> ReadinessState {
        self.init
            .get_or_init(|| self.initialize(config))
            .await
            .clone()
    }

    pub fn readiness(&self) -> ReadinessSignal {
        self.signal.clone()
    }

    /// Handles, once ready. Never exposes a partial set.
    pub fn handles(&self) -> Option<ServiceHandles> {
        self.signal.current().handles().cloned()
    }

    pub fn persistence(&self) -> &Arc<PersistenceCoordinator> {
        &self.persistence
    }

    /// Number of initialization attempts actually started.
    pub fn bootstrap_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn initialize(&self, config: ConnectionConfig) -> ReadinessState {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tracing::info!(target: "tabsync.bootstrap", stage = "registry.bootstrap.in");

        let state = match self.build(config).await {
            Ok(handles) => ReadinessState::Ready(handles),
            Err(e) => {
                tracing::error!(
                    target: "tabsync.bootstrap",
                    stage = "registry.bootstrap.out",
                    kind = ?e.kind(),
                    error = %e,
                    "bootstrap failed"
                );
                ReadinessState::Failed(e)
            }
        };
        self.signal.resolve(state.clone());
        state
    }

    async fn build(&self, config: ConnectionConfig) -> Result<ServiceHandles, BootstrapError> {
        let config = ConfigValidator::validate(config)?;

        // Any failure drops the handles that did connect; none become reachable.
        let (auth, documents, blobs) = tokio::try_join!(
            self.connector.connect_auth(&config),
            self.connector.connect_documents(&config),
            self.connector.connect_blobs(&config),
        )?;
        let handles = ServiceHandles::new(auth, documents, blobs);

        let outcome = self
            .persistence
            .enable_persistence(handles.documents().as_ref())
            .await;
        if let PersistenceOutcome::Enabled { .. } = outcome {
            self.persistence.start_heartbeat();
        }

        tracing::info!(
            target: "tabsync.bootstrap",
            stage = "registry.bootstrap.out",
            namespace = %handles.documents().namespace(),
            persistence = ?outcome,
            "services ready"
        );
        Ok(handles)
    }
}
