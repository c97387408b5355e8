use serde::Serialize;
use thiserror::Error;

/// Why a connection parameter was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingKey,
    PlaceholderValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigViolation {
    pub kind: ViolationKind,
    pub key: String,
}

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ViolationKind::MissingKey => write!(f, "{} is missing or empty", self.key),
            ViolationKind::PlaceholderValue => write!(f, "{} still holds a placeholder", self.key),
        }
    }
}

/// All violations found in one validation pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid connection config: {}", join_violations(.violations))]
pub struct ConfigError {
    pub violations: Vec<ConfigViolation>,
}

impl ConfigError {
    /// Names of the offending keys, in validation order.
    pub fn keys(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.key.as_str()).collect()
    }
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Remote sub-service a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Auth,
    Documents,
    Blobs,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Auth => write!(f, "auth"),
            ServiceKind::Documents => write!(f, "documents"),
            ServiceKind::Blobs => write!(f, "blobs"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("connecting {service} failed: {detail}")]
pub struct ConnectionError {
    pub service: ServiceKind,
    pub detail: String,
}

impl ConnectionError {
    pub fn new(service: ServiceKind, detail: impl Into<String>) -> Self {
        Self {
            service,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connection,
}

/// Fatal bootstrap failure, reported through the readiness signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::Config(_) => ErrorKind::Config,
            BootstrapError::Connection(_) => ErrorKind::Connection,
        }
    }

    /// Offending config keys, or the failed service name.
    pub fn detail(&self) -> Vec<String> {
        match self {
            BootstrapError::Config(e) => e.keys().into_iter().map(str::to_string).collect(),
            BootstrapError::Connection(e) => vec![e.service.to_string()],
        }
    }
}

/// Reasons persistence ended up degraded. None of these are fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum PersistenceError {
    #[error("cache lease held by another tab ({})", .holder.as_deref().unwrap_or("unknown"))]
    LeaseContention { holder: Option<String> },
    #[error("shared local cache is not supported on this platform")]
    CapabilityUnsupported,
    #[error("persistence init failed: {0}")]
    PersistenceInit(String),
    #[error("cache lease lost: {0}")]
    LeaseLost(String),
    #[error("local cache io failed: {0}")]
    Io(String),
}

/// Outcomes of remote store calls other than success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("entity {0} not found")]
    NotFound(String),
    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote request timed out")]
    Timeout,
}

impl RemoteError {
    /// Network-level failures that are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout)
    }

    /// Failures that will not succeed on retry.
    pub fn is_durable_rejection(&self) -> bool {
        matches!(
            self,
            RemoteError::PermissionDenied(_) | RemoteError::Rejected(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue journal corrupted at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("queue encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid payload for {key}: {reason}")]
    InvalidPayload { key: String, reason: String },
    #[error("queue journal {} is held by another process", path.display())]
    Locked { path: std::path::PathBuf },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
