//! Connection parameter validation. Runs before any connection attempt.

use lazy_static::lazy_static;
use regex::Regex;

use super::connection::{ConnectionConfig, ConnectionKey};
use crate::error::{ConfigError, ConfigViolation, ViolationKind};

lazy_static! {
    // Templated tokens ("YOUR_API_KEY", "<project>", "${APP_ID}", "{{bucket}}")
    // and literal sentinels left behind by sample env files.
    static ref PLACEHOLDER: Regex = Regex::new(
        r"(?i)^(your[_\-].*|<[^>]*>|\$\{[^}]*\}|\{\{[^}]*\}\}|change[_\-]?me|placeholder|undefined|null|none|todo|x{3,}|\.{3})$"
    )
    .unwrap();
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Returns the configuration unchanged, or every violation found.
    pub fn validate(config: ConnectionConfig) -> Result<ConnectionConfig, ConfigError> {
        let violations = Self::violations(&config);
        if violations.is_empty() {
            return Ok(config);
        }
        for v in &violations {
            tracing::error!(
                target: "tabsync.config",
                key = %v.key,
                kind = ?v.kind,
                env = v.key.parse::<ConnectionKey>().map(|k| k.env_var()).unwrap_or(""),
                "connection parameter rejected"
            );
        }
        Err(ConfigError { violations })
    }

    /// Checks every key without short-circuiting.
    pub fn violations(config: &ConnectionConfig) -> Vec<ConfigViolation> {
        ConnectionKey::ALL
            .into_iter()
            .filter_map(|key| {
                let kind = match config.get(key).map(str::trim) {
                    None | Some("") if key.is_required() => ViolationKind::MissingKey,
                    None | Some("") => return None,
                    Some(v) if is_placeholder(v) => ViolationKind::PlaceholderValue,
                    Some(_) => return None,
                };
                Some(ConfigViolation {
                    kind,
                    key: key.name().to_string(),
                })
            })
            .collect()
    }
}

pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER.is_match(value.trim())
}
