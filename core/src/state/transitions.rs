//! Readiness transition rules.

use super::readiness::ReadinessState;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("readiness already resolved as {state}")]
    AlreadyResolved { state: &'static str },
    #[error("readiness cannot be resolved back to pending")]
    BackToPending,
}

pub struct ReadinessTransition;

impl ReadinessTransition {
    /// Only Pending→Ready and Pending→Failed are legal.
    pub fn validate(from: &ReadinessState, to: &ReadinessState) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::AlreadyResolved {
                state: Self::label(from),
            });
        }
        if !Self::is_terminal(to) {
            return Err(TransitionError::BackToPending);
        }
        Ok(())
    }

    pub fn is_terminal(state: &ReadinessState) -> bool {
        !matches!(state, ReadinessState::Pending)
    }

    pub fn label(state: &ReadinessState) -> &'static str {
        match state {
            ReadinessState::Pending => "pending",
            ReadinessState::Ready(_) => "ready",
            ReadinessState::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BootstrapError, ConnectionError, ServiceKind};

    fn failed() -> ReadinessState {
        ReadinessState::Failed(BootstrapError::Connection(ConnectionError::new(
            ServiceKind::Auth,
            "refused",
        )))
    }

    #[test]
    fn pending_may_resolve_once() {
        assert!(ReadinessTransition::validate(&ReadinessState::Pending, &failed()).is_ok());
        assert_eq!(
            ReadinessTransition::validate(&failed(), &failed()),
            Err(TransitionError::AlreadyResolved { state: "failed" })
        );
    }

    #[test]
    fn pending_to_pending_is_rejected() {
        assert_eq!(
            ReadinessTransition::validate(&ReadinessState::Pending, &ReadinessState::Pending),
            Err(TransitionError::BackToPending)
        );
    }
}
