//! Narrow interface onto the managed backend.
//!
//! The backend's wire protocol is not modelled here; adapters live in
//! `tabsync-plugins` (HTTP) and [`crate::inproc`] (in-process).

pub mod traits;
pub mod types;

pub use traits::{AuthSession, BlobStore, DocumentStore, RemoteConnector};
pub use types::{ChangeEvent, ChangeKind, ChangeStream, RemoteEntity, SubscriptionTarget, WriteCondition};
