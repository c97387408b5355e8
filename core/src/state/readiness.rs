//! Single-resolution readiness signal.
//!
//! Backed by a `watch` channel: waiters suspend on `wait_for` until the value
//! leaves `Pending`, and every waiter clones the same terminal value.

use std::sync::Arc;

use tokio::sync::watch;

use super::transitions::ReadinessTransition;
use crate::error::BootstrapError;
use crate::registry::ServiceHandles;

#[derive(Debug, Clone)]
pub enum ReadinessState {
    Pending,
    Ready(ServiceHandles),
    Failed(BootstrapError),
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready(_))
    }

    pub fn handles(&self) -> Option<&ServiceHandles> {
        match self {
            ReadinessState::Ready(h) => Some(h),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BootstrapError> {
        match self {
            ReadinessState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// `Pending` maps to `None`.
    pub fn into_result(self) -> Option<Result<ServiceHandles, BootstrapError>> {
        match self {
            ReadinessState::Pending => None,
            ReadinessState::Ready(h) => Some(Ok(h)),
            ReadinessState::Failed(e) => Some(Err(e)),
        }
    }
}

#[derive(Clone)]
pub struct ReadinessSignal {
    tx: Arc<watch::Sender<ReadinessState>>,
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ReadinessState::Pending);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ReadinessState {
        self.tx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        ReadinessTransition::is_terminal(&self.tx.borrow())
    }

    /// Resolve to a terminal state. A second resolution is a bug: it trips a
    /// debug assertion and is ignored in release builds.
    pub fn resolve(&self, state: ReadinessState) -> bool {
        let mut next = Some(state);
        let mut rejected = None;
        self.tx.send_if_modified(|current| {
            let Some(state) = next.take() else {
                return false;
            };
            match ReadinessTransition::validate(current, &state) {
                Ok(()) => {
                    *current = state;
                    true
                }
                Err(e) => {
                    rejected = Some(e);
                    false
                }
            }
        });

        match rejected {
            None => true,
            Some(e) => {
                tracing::error!(target: "tabsync.bootstrap", error = %e, "readiness resolved twice");
                if cfg!(debug_assertions) {
                    panic!("readiness signal resolved twice: {e}");
                }
                false
            }
        }
    }

    /// Suspends until resolution. Not cancellable by itself; wrap it in
    /// `tokio::time::timeout` when a deadline is needed.
    pub async fn wait(&self) -> ReadinessState {
        let mut rx = self.tx.subscribe();
        let resolved = rx
            .wait_for(ReadinessTransition::is_terminal)
            .await
            .map(|state| state.clone());
        // The sender lives as long as `self`, so the channel cannot close here.
        resolved.unwrap_or_else(|_| self.current())
    }

    pub async fn wait_ready(&self) -> Result<ServiceHandles, BootstrapError> {
        match self.wait().await {
            ReadinessState::Ready(h) => Ok(h),
            ReadinessState::Failed(e) => Err(e),
            ReadinessState::Pending => unreachable!("wait returns only terminal states"),
        }
    }
}
