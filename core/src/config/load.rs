use std::path::{Path, PathBuf};

use super::types::{AppConfig, RemoteProvider};

/// Get the default tabsync data directory: ~/.tabsync
pub fn get_tabsync_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(v) = std::env::var("TABSYNC_DATA_DIR") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".tabsync"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.tabsync/config.toml (highest)
    let data_dir = get_tabsync_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./tabsync.toml (current directory)
    let local_config = Path::new("tabsync.toml");

    let cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    finalize(cfg, &data_dir)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
    let cfg = toml::from_str::<AppConfig>(&s)?;
    Ok(cfg)
}

/// An explicitly named config file, finalized like the default lookup.
pub fn load_explicit(path: &Path) -> anyhow::Result<AppConfig> {
    let cfg = load_from_path(path)?;
    finalize(cfg, &get_tabsync_data_dir()?)
}

fn finalize(mut cfg: AppConfig, data_dir: &Path) -> anyhow::Result<AppConfig> {
    let data_dir = match cfg.data_dir.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => PathBuf::from(d),
        _ => data_dir.to_path_buf(),
    };
    cfg.data_dir = Some(data_dir.to_string_lossy().to_string());

    if is_blank(cfg.sync.queue_path.as_deref()) {
        cfg.sync.queue_path = Some(
            data_dir
                .join("queue.jsonl")
                .to_string_lossy()
                .to_string(),
        );
    }

    if is_blank(cfg.persistence.cache_dir.as_deref()) {
        cfg.persistence.cache_dir = Some(data_dir.join("cache").to_string_lossy().to_string());
    }

    if cfg.logging.file && is_blank(cfg.logging.directory.as_deref()) {
        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)?;
        cfg.logging.directory = Some(logs_dir.to_string_lossy().to_string());
    }

    // Environment variable overrides (Priority 0: highest)
    if let Ok(v) = std::env::var("TABSYNC_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }

    if let RemoteProvider::Http(ref mut http) = cfg.remote.provider {
        if let Ok(v) = std::env::var("TABSYNC_REMOTE_URL") {
            if !v.trim().is_empty() {
                http.base_url = v;
            }
        }
    }

    Ok(cfg)
}

fn is_blank(v: Option<&str>) -> bool {
    v.map(|s| s.trim().is_empty()).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finalize_fills_paths_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let cfg = finalize(AppConfig::default(), dir.path()).unwrap();

        let queue = cfg.sync.queue_path.unwrap();
        assert!(queue.ends_with("queue.jsonl"));
        assert!(queue.starts_with(dir.path().to_string_lossy().as_ref()));
        assert!(cfg.persistence.cache_dir.unwrap().ends_with("cache"));
    }

    #[test]
    fn explicit_queue_path_is_kept() {
        let dir = TempDir::new().unwrap();
        let mut cfg = AppConfig::default();
        cfg.sync.queue_path = Some("/tmp/custom.jsonl".into());
        let cfg = finalize(cfg, dir.path()).unwrap();
        assert_eq!(cfg.sync.queue_path.as_deref(), Some("/tmp/custom.jsonl"));
    }

    #[test]
    fn load_from_path_reads_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tabsync.toml");
        std::fs::write(&path, "[sync]\nbackoff_initial_ms = 10\n").unwrap();
        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.sync.backoff_initial_ms, 10);
    }
}
