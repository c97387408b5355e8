//! Replication status as seen by the UI layer.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::util::lock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    /// Remote unreachable; writes keep queueing locally.
    Degraded,
    Error(String),
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Degraded => write!(f, "degraded"),
            SyncState::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

pub type SyncStateListener = Box<dyn Fn(&SyncState) + Send + Sync>;

/// Holds the current state and fans changes out to registered listeners.
#[derive(Clone)]
pub struct SyncStateHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    tx: watch::Sender<SyncState>,
    listeners: Mutex<Vec<SyncStateListener>>,
}

impl Default for SyncStateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateHub {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncState::Idle);
        Self {
            inner: Arc::new(HubInner {
                tx,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn current(&self) -> SyncState {
        self.inner.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.tx.subscribe()
    }

    /// Listeners run synchronously on the task that changed the state.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).push(Box::new(listener));
    }

    /// Repeated identical states are not re-delivered.
    pub fn set(&self, state: SyncState) {
        let changed = self.inner.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if !changed {
            return;
        }
        tracing::debug!(target: "tabsync.sync", state = %state, "sync state changed");
        for listener in lock(&self.inner.listeners).iter() {
            listener(&state);
        }
    }
}
