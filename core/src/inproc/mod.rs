//! In-process backends: a remote store living in memory and a shared-storage
//! platform whose clones behave like tabs of one browser profile.
//!
//! Used by the `memory` remote provider, by the CLI's dry runs, and by tests.

pub mod cache;
pub mod remote;

pub use cache::{InProcessCache, InProcessCachePlatform};
pub use remote::{InProcessConnector, InProcessRemote};
