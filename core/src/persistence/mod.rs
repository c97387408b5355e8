//! Local durable cache enablement and cross-tab ownership.
//!
//! Ownership is arbitrated by the platform's shared-storage primitive
//! ([`CachePlatform`]), never by in-process locking. Every failure here ends
//! in a degraded outcome; none of them affects bootstrap readiness.

pub mod coordinator;
pub mod lease;
pub mod platform;

pub use coordinator::{PersistenceCoordinator, PersistenceOutcome, PersistenceSettings};
pub use lease::{TabId, TabOwnershipLease};
pub use platform::{CacheHandle, CacheMode, CachePlatform, LeaseError, OpenError};
