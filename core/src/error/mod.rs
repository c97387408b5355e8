#[allow(clippy::module_inception)]
pub mod error;

pub use error::{
    BootstrapError, CliError, ConfigError, ConfigViolation, ConnectionError, ErrorKind,
    PersistenceError, QueueError, RemoteError, ServiceKind, ViolationKind,
};
