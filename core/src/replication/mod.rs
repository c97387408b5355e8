pub mod backoff;
pub mod conflict;
pub mod engine;

pub use backoff::{Backoff, BackoffPolicy};
pub use conflict::{
    merge_fields, plan_replay, ConflictRecord, ReplayAction, ReplayPlan, Resolution, Winner,
};
pub use engine::{DrainReport, EngineCommand, RejectedMutation, ReplicationEngine};
