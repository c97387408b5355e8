use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

use super::lease::{TabId, TabOwnershipLease};
use super::platform::{CacheHandle, CacheMode, CachePlatform, LeaseError, OpenError};
use crate::config::{PersistenceConfig, RuntimeContext};
use crate::error::PersistenceError;
use crate::remote::DocumentStore;
use crate::util::lock;

#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub enabled: bool,
    pub context: RuntimeContext,
    pub prefer_multi_owner: bool,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&PersistenceConfig> for PersistenceSettings {
    fn from(cfg: &PersistenceConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            context: cfg.context,
            prefer_multi_owner: cfg.prefer_multi_owner,
            lease_ttl: cfg.lease_ttl(),
            heartbeat_interval: cfg.heartbeat_interval(),
        }
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self::from(&PersistenceConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    Enabled { mode: CacheMode },
    /// This tab runs remote-only.
    Degraded { cause: PersistenceError },
    /// Non-interactive context or persistence switched off.
    Skipped,
}

impl PersistenceOutcome {
    pub fn is_enabled(&self) -> bool {
        matches!(self, PersistenceOutcome::Enabled { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PersistenceOutcome::Degraded { .. })
    }
}

pub struct PersistenceCoordinator {
    platform: Option<Arc<dyn CachePlatform>>,
    settings: PersistenceSettings,
    tab_id: TabId,
    attempt: OnceCell<PersistenceOutcome>,
    status: watch::Sender<Option<PersistenceOutcome>>,
    cache: Mutex<Option<Arc<dyn CacheHandle>>>,
    lease: Mutex<Option<TabOwnershipLease>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceCoordinator {
    /// `platform = None` means the host has no shared-storage primitive at all.
    pub fn new(
        platform: Option<Arc<dyn CachePlatform>>,
        settings: PersistenceSettings,
        tab_id: TabId,
    ) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            platform,
            settings,
            tab_id,
            attempt: OnceCell::new(),
            status,
            cache: Mutex::new(None),
            lease: Mutex::new(None),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Current outcome; reflects runtime downgrades such as a lost lease.
    pub fn status(&self) -> Option<PersistenceOutcome> {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PersistenceOutcome>> {
        self.status.subscribe()
    }

    /// Cache write path; `None` while degraded.
    pub fn cache(&self) -> Option<Arc<dyn CacheHandle>> {
        lock(&self.cache).clone()
    }

    pub fn lease(&self) -> Option<TabOwnershipLease> {
        lock(&self.lease).clone()
    }

    pub fn holds_lease(&self) -> bool {
        lock(&self.lease).is_some()
    }

    /// Runs the enable protocol once; later calls return the first outcome.
    pub async fn enable_persistence(&self, documents: &dyn DocumentStore) -> PersistenceOutcome {
        let namespace = documents.namespace().to_string();
        self.attempt
            .get_or_init(|| async {
                let outcome = self.run_enable(&namespace).await;
                match &outcome {
                    PersistenceOutcome::Enabled { mode } => tracing::info!(
                        target: "tabsync.persistence",
                        stage = "persistence.enable.out",
                        namespace = %namespace,
                        tab = %self.tab_id,
                        mode = %mode,
                        "local cache enabled"
                    ),
                    PersistenceOutcome::Degraded { cause } => tracing::warn!(
                        target: "tabsync.persistence",
                        stage = "persistence.enable.out",
                        namespace = %namespace,
                        tab = %self.tab_id,
                        cause = %cause,
                        "persistence degraded, continuing remote-only"
                    ),
                    PersistenceOutcome::Skipped => tracing::debug!(
                        target: "tabsync.persistence",
                        stage = "persistence.enable.out",
                        "persistence skipped"
                    ),
                }
                self.status.send_replace(Some(outcome.clone()));
                outcome
            })
            .await
            .clone()
    }

    async fn run_enable(&self, namespace: &str) -> PersistenceOutcome {
        if !self.settings.enabled || self.settings.context == RuntimeContext::Server {
            return PersistenceOutcome::Skipped;
        }
        let Some(platform) = self.platform.clone() else {
            return degraded(PersistenceError::CapabilityUnsupported);
        };

        if self.settings.prefer_multi_owner && platform.supports(CacheMode::MultiOwner) {
            match platform.open_shared(namespace, CacheMode::MultiOwner).await {
                Ok(handle) => {
                    *lock(&self.cache) = Some(handle);
                    return PersistenceOutcome::Enabled {
                        mode: CacheMode::MultiOwner,
                    };
                }
                Err(OpenError::Unsupported) => {}
                Err(e) => {
                    tracing::debug!(
                        target: "tabsync.persistence",
                        error = %e,
                        "multi-owner open failed, trying single-owner"
                    );
                }
            }
        }

        if !platform.supports(CacheMode::SingleOwner) {
            return degraded(PersistenceError::CapabilityUnsupported);
        }

        let lease = match platform
            .acquire_lease(namespace, &self.tab_id, self.settings.lease_ttl)
            .await
        {
            Ok(lease) => lease,
            Err(LeaseError::Busy { holder }) => {
                return degraded(PersistenceError::LeaseContention {
                    holder: Some(holder),
                })
            }
            Err(e) => return degraded(PersistenceError::PersistenceInit(e.to_string())),
        };

        match platform.open_shared(namespace, CacheMode::SingleOwner).await {
            Ok(handle) => {
                *lock(&self.cache) = Some(handle);
                *lock(&self.lease) = Some(lease);
                PersistenceOutcome::Enabled {
                    mode: CacheMode::SingleOwner,
                }
            }
            Err(open_err) => {
                if let Err(e) = platform.release_lease(&lease).await {
                    tracing::warn!(target: "tabsync.persistence", error = %e, "lease release after failed open");
                }
                degraded(match open_err {
                    OpenError::Unsupported => PersistenceError::CapabilityUnsupported,
                    OpenError::Contended { holder } => PersistenceError::LeaseContention { holder },
                    OpenError::Failed(detail) => PersistenceError::PersistenceInit(detail),
                })
            }
        }
    }

    /// Renew the held lease once. Losing it downgrades this tab to remote-only.
    pub async fn heartbeat(&self) -> Result<(), PersistenceError> {
        let (Some(platform), Some(held)) = (self.platform.clone(), self.lease()) else {
            return Ok(());
        };

        match platform.renew_lease(&held).await {
            Ok(renewed) => {
                let mut slot = lock(&self.lease);
                if slot.as_ref().is_some_and(|l| l.is_same_grant(&renewed)) {
                    *slot = Some(renewed);
                }
                Ok(())
            }
            Err(LeaseError::Failed(detail)) => {
                // Storage hiccup: keep the lease, the next beat retries before the TTL runs out.
                tracing::warn!(target: "tabsync.persistence", error = %detail, "lease renewal failed");
                Err(PersistenceError::Io(detail))
            }
            Err(e) => {
                let cause = PersistenceError::LeaseLost(e.to_string());
                tracing::warn!(
                    target: "tabsync.persistence",
                    tab = %self.tab_id,
                    cause = %cause,
                    "lost cache lease, switching to remote-only"
                );
                lock(&self.lease).take();
                lock(&self.cache).take();
                self.status
                    .send_replace(Some(PersistenceOutcome::Degraded { cause: cause.clone() }));
                Err(cause)
            }
        }
    }

    /// Start periodic renewal. The task is owned here and aborted on release.
    pub fn start_heartbeat(self: &Arc<Self>) {
        if !self.holds_lease() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.settings.heartbeat_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                if let Err(PersistenceError::LeaseLost(_)) = this.heartbeat().await {
                    break;
                }
            }
        });
        if let Some(previous) = lock(&self.heartbeat).replace(task) {
            previous.abort();
        }
    }

    /// Orderly shutdown: stop renewing and hand the lease back.
    pub async fn release(&self) {
        if let Some(task) = lock(&self.heartbeat).take() {
            task.abort();
        }
        lock(&self.cache).take();
        let held = lock(&self.lease).take();
        if let (Some(platform), Some(lease)) = (self.platform.as_ref(), held) {
            match platform.release_lease(&lease).await {
                Ok(()) => tracing::info!(
                    target: "tabsync.persistence",
                    tab = %self.tab_id,
                    "cache lease released"
                ),
                Err(e) => tracing::warn!(target: "tabsync.persistence", error = %e, "lease release failed"),
            }
        }
    }
}

impl Drop for PersistenceCoordinator {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.heartbeat).take() {
            task.abort();
        }
    }
}

fn degraded(cause: PersistenceError) -> PersistenceOutcome {
    PersistenceOutcome::Degraded { cause }
}
