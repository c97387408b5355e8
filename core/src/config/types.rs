use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    /// Root for the queue journal and file cache. Filled by `load_default` when unset.
    #[serde(default)]
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "tabsync_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Where this process runs. Only interactive contexts share a local cache with peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeContext {
    #[default]
    Interactive,
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub context: RuntimeContext,

    /// Try multi-owner mode first when the platform supports it.
    #[serde(default = "default_prefer_multi_owner")]
    pub prefer_multi_owner: bool,

    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default)]
    pub cache_dir: Option<String>,
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_prefer_multi_owner() -> bool {
    true
}

fn default_lease_ttl_ms() -> u64 {
    15_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            context: RuntimeContext::default(),
            prefer_multi_owner: default_prefer_multi_owner(),
            lease_ttl_ms: default_lease_ttl_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            cache_dir: None,
        }
    }
}

impl PersistenceConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Journal file for the offline mutation queue. Unset keeps the queue in memory.
    #[serde(default)]
    pub queue_path: Option<String>,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Dead journal entries tolerated before the journal is rewritten.
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: usize,

    /// Initial connectivity assumption before any platform event arrives.
    #[serde(default = "default_assume_online")]
    pub assume_online: bool,
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_compact_threshold() -> usize {
    256
}

fn default_assume_online() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_path: None,
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            compact_threshold: default_compact_threshold(),
            assume_online: default_assume_online(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(flatten)]
    pub provider: RemoteProvider,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: RemoteProvider::Memory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum RemoteProvider {
    /// In-process store; useful for local runs and tests.
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "http")]
    Http(HttpRemoteConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRemoteConfig {
    #[serde(default = "default_remote_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay between change-feed polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_remote_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
