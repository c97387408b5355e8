pub mod connection;
pub mod load;
pub mod types;
pub mod validate;

pub use connection::{ConnectionConfig, ConnectionKey, PUBLIC_ENV_PREFIX};
pub use load::{get_tabsync_data_dir, load_default, load_explicit, load_from_path};
pub use types::{
    AppConfig, HttpRemoteConfig, LoggingConfig, PersistenceConfig, RemoteConfig, RemoteProvider,
    RuntimeContext, SyncConfig,
};
pub use validate::ConfigValidator;
