//! tabsync-core: bootstrap, multi-tab persistence and offline replication for a
//! managed document backend.

pub mod api;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod inproc;
pub mod persistence;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod replication;
pub mod state;
pub(crate) mod util;
