#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tabsync_core::api::{
    AppConfig, Backends, CachePlatform, ConnectionConfig, ConnectionKey, InProcessCachePlatform,
    InProcessRemote, SyncContext,
};

pub fn valid_connection() -> ConnectionConfig {
    ConnectionConfig::new()
        .with(ConnectionKey::ApiKey, "AIzaSyD-test-key")
        .with(ConnectionKey::AuthDomain, "demo-app.example.com")
        .with(ConnectionKey::ProjectId, "demo-app")
        .with(ConnectionKey::StorageBucket, "demo-app.appspot.com")
        .with(ConnectionKey::MessagingSenderId, "1234567890")
        .with(ConnectionKey::AppId, "1:1234567890:web:abcdef")
}

/// Fast backoff and short leases so scenarios finish quickly.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.sync.backoff_initial_ms = 5;
    cfg.sync.backoff_max_ms = 20;
    cfg.persistence.lease_ttl_ms = 200;
    cfg.persistence.heartbeat_interval_ms = 50;
    cfg
}

/// Routes `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn context(
    remote: &InProcessRemote,
    platform: Option<InProcessCachePlatform>,
    cfg: AppConfig,
) -> SyncContext {
    init_tracing();
    let backends = Backends {
        connector: Arc::new(remote.connector()),
        platform: platform.map(|p| Arc::new(p) as Arc<dyn CachePlatform>),
    };
    SyncContext::new(cfg, backends).expect("context")
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
