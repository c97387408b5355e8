//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `tabsync_core::api` instead of reaching into internal modules.

pub use crate::config::{
    load_default, load_explicit, load_from_path, AppConfig, ConfigValidator, ConnectionConfig,
    ConnectionKey, HttpRemoteConfig, LoggingConfig, PersistenceConfig, RemoteConfig,
    RemoteProvider, RuntimeContext, SyncConfig, PUBLIC_ENV_PREFIX,
};
pub use crate::connectivity::{ConnectionMonitor, ConnectivityTransition};
pub use crate::context::{BackendFactory, Backends, SyncContext};
pub use crate::error::{
    BootstrapError, CliError, ConfigError, ConfigViolation, ConnectionError, ErrorKind,
    PersistenceError, QueueError, RemoteError, ServiceKind,
};
pub use crate::inproc::{InProcessCachePlatform, InProcessConnector, InProcessRemote};
pub use crate::persistence::{
    CacheHandle, CacheMode, CachePlatform, LeaseError, OpenError, PersistenceCoordinator,
    PersistenceOutcome, PersistenceSettings, TabId, TabOwnershipLease,
};
pub use crate::queue::{EnqueueOutcome, LocalMutationQueue, MutationRecord, Operation};
pub use crate::registry::{ServiceHandles, ServiceRegistry};
pub use crate::remote::{
    AuthSession, BlobStore, ChangeEvent, ChangeKind, ChangeStream, DocumentStore,
    RemoteConnector, RemoteEntity, SubscriptionTarget, WriteCondition,
};
pub use crate::replication::{
    ConflictRecord, DrainReport, RejectedMutation, ReplicationEngine, Resolution, Winner,
};
pub use crate::state::{ReadinessSignal, ReadinessState, SyncState};
