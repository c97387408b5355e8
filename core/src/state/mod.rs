//! Observable process state: bootstrap readiness and replication status.

pub mod readiness;
pub mod sync_state;
pub mod transitions;

pub use readiness::{ReadinessSignal, ReadinessState};
pub use sync_state::{SyncState, SyncStateHub, SyncStateListener};
pub use transitions::{ReadinessTransition, TransitionError};
