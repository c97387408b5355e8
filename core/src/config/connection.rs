//! Connection parameters handed to the remote store at bootstrap.
//!
//! Values arrive once from the environment under `TABSYNC_PUBLIC_*` names. Only
//! parameters meant for client exposure travel this way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PUBLIC_ENV_PREFIX: &str = "TABSYNC_PUBLIC_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionKey {
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "authDomain")]
    AuthDomain,
    #[serde(rename = "projectId")]
    ProjectId,
    #[serde(rename = "storageBucket")]
    StorageBucket,
    #[serde(rename = "messagingSenderId")]
    MessagingSenderId,
    #[serde(rename = "appId")]
    AppId,
    #[serde(rename = "measurementId")]
    MeasurementId,
}

impl ConnectionKey {
    pub const ALL: [ConnectionKey; 7] = [
        ConnectionKey::ApiKey,
        ConnectionKey::AuthDomain,
        ConnectionKey::ProjectId,
        ConnectionKey::StorageBucket,
        ConnectionKey::MessagingSenderId,
        ConnectionKey::AppId,
        ConnectionKey::MeasurementId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConnectionKey::ApiKey => "apiKey",
            ConnectionKey::AuthDomain => "authDomain",
            ConnectionKey::ProjectId => "projectId",
            ConnectionKey::StorageBucket => "storageBucket",
            ConnectionKey::MessagingSenderId => "messagingSenderId",
            ConnectionKey::AppId => "appId",
            ConnectionKey::MeasurementId => "measurementId",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            ConnectionKey::ApiKey => "TABSYNC_PUBLIC_API_KEY",
            ConnectionKey::AuthDomain => "TABSYNC_PUBLIC_AUTH_DOMAIN",
            ConnectionKey::ProjectId => "TABSYNC_PUBLIC_PROJECT_ID",
            ConnectionKey::StorageBucket => "TABSYNC_PUBLIC_STORAGE_BUCKET",
            ConnectionKey::MessagingSenderId => "TABSYNC_PUBLIC_MESSAGING_SENDER_ID",
            ConnectionKey::AppId => "TABSYNC_PUBLIC_APP_ID",
            ConnectionKey::MeasurementId => "TABSYNC_PUBLIC_MEASUREMENT_ID",
        }
    }

    /// The analytics id is the only optional parameter.
    pub fn is_required(self) -> bool {
        !matches!(self, ConnectionKey::MeasurementId)
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ConnectionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionKey::ALL
            .into_iter()
            .find(|k| k.name() == s || k.env_var() == s)
            .ok_or_else(|| format!("Unknown connection key: {}", s))
    }
}

/// Immutable once built; the registry takes it by value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    values: BTreeMap<ConnectionKey, String>,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: ConnectionKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    pub fn without(mut self, key: ConnectionKey) -> Self {
        self.values.remove(&key);
        self
    }

    /// Read every `TABSYNC_PUBLIC_*` parameter from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let values = ConnectionKey::ALL
            .into_iter()
            .filter_map(|key| lookup(key.env_var()).map(|v| (key, v)))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: ConnectionKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn project_id(&self) -> Option<&str> {
        self.get(ConnectionKey::ProjectId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_reads_public_names() {
        let env: HashMap<&str, &str> = [
            ("TABSYNC_PUBLIC_PROJECT_ID", "demo"),
            ("TABSYNC_PUBLIC_API_KEY", "k-123"),
            ("TABSYNC_SECRET", "never"),
        ]
        .into_iter()
        .collect();
        let cfg = ConnectionConfig::from_lookup(|v| env.get(v).map(|s| s.to_string()));

        assert_eq!(cfg.project_id(), Some("demo"));
        assert_eq!(cfg.get(ConnectionKey::ApiKey), Some("k-123"));
        assert_eq!(cfg.iter().count(), 2);
    }

    #[test]
    fn key_parses_from_name_or_env() {
        assert_eq!(
            "projectId".parse::<ConnectionKey>().unwrap(),
            ConnectionKey::ProjectId
        );
        assert_eq!(
            "TABSYNC_PUBLIC_APP_ID".parse::<ConnectionKey>().unwrap(),
            ConnectionKey::AppId
        );
        assert!("project".parse::<ConnectionKey>().is_err());
    }

    #[test]
    fn every_env_var_uses_public_prefix() {
        for key in ConnectionKey::ALL {
            assert!(key.env_var().starts_with(PUBLIC_ENV_PREFIX));
        }
    }
}
