use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use tabsync_core::api::{
    AppConfig, BackendFactory, Backends, CachePlatform, InProcessRemote, RemoteConnector,
    RemoteProvider, RuntimeContext,
};

use crate::cache::FileCachePlatform;
use crate::remote::HttpConnector;

pub fn build_connector(cfg: &AppConfig) -> Arc<dyn RemoteConnector> {
    match &cfg.remote.provider {
        RemoteProvider::Memory => Arc::new(InProcessRemote::new().connector()),
        RemoteProvider::Http(http_cfg) => Arc::new(HttpConnector::new(http_cfg.clone())),
    }
}

/// `None` when this process has no shared storage to offer: persistence is
/// switched off, it runs as a server, or no cache directory is configured.
pub fn build_cache_platform(cfg: &AppConfig) -> Option<Arc<dyn CachePlatform>> {
    if !cfg.persistence.enabled || cfg.persistence.context == RuntimeContext::Server {
        return None;
    }
    let dir = cfg
        .persistence
        .cache_dir
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())?;
    Some(Arc::new(FileCachePlatform::new(dir)))
}

pub struct PluginBackendFactory;

impl Default for PluginBackendFactory {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl BackendFactory for PluginBackendFactory {
    async fn build_backends(&self, cfg: &AppConfig) -> Result<Backends> {
        let connector = build_connector(cfg);
        let platform = build_cache_platform(cfg);
        tracing::debug!(
            target: "tabsync.factory",
            provider = provider_name(&cfg.remote.provider),
            shared_storage = platform.is_some(),
            "backends built"
        );
        Ok(Backends {
            connector,
            platform,
        })
    }
}

fn provider_name(provider: &RemoteProvider) -> &'static str {
    match provider {
        RemoteProvider::Memory => "memory",
        RemoteProvider::Http(_) => "http",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_core::api::{CacheMode, HttpRemoteConfig};

    #[test]
    fn platform_follows_cache_dir_and_context() {
        let mut cfg = AppConfig::default();
        assert!(build_cache_platform(&cfg).is_none());

        cfg.persistence.cache_dir = Some("/tmp/tabsync-cache".into());
        let platform = build_cache_platform(&cfg).unwrap();
        assert!(platform.supports(CacheMode::SingleOwner));

        cfg.persistence.context = RuntimeContext::Server;
        assert!(build_cache_platform(&cfg).is_none());
    }

    #[tokio::test]
    async fn factory_builds_http_backends() {
        let mut cfg = AppConfig::default();
        cfg.remote.provider = RemoteProvider::Http(HttpRemoteConfig::default());
        let backends = PluginBackendFactory.build_backends(&cfg).await.unwrap();
        assert!(backends.platform.is_none());
        assert_eq!(provider_name(&cfg.remote.provider), "http");
    }
}
