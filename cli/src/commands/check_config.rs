use serde::Serialize;

use tabsync_core::api::{
    CliError, ConfigError, ConfigValidator, ConfigViolation, ConnectionConfig, ConnectionKey,
};

use super::output::emit;

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub valid: bool,
    /// Keys present in the environment; values are never echoed.
    pub present: Vec<&'static str>,
    pub violations: Vec<ConfigViolation>,
}

pub fn inspect(connection: &ConnectionConfig) -> ConfigReport {
    let violations = ConfigValidator::violations(connection);
    ConfigReport {
        valid: violations.is_empty(),
        present: connection.iter().map(|(k, _)| k.name()).collect(),
        violations,
    }
}

pub fn run(json: bool) -> Result<i32, CliError> {
    let connection = ConnectionConfig::from_env();
    let report = inspect(&connection);
    emit(json, &report, |r| {
        if r.valid {
            return format!("connection config ok ({} keys)", r.present.len());
        }
        r.violations
            .iter()
            .map(|v| {
                let env = v
                    .key
                    .parse::<ConnectionKey>()
                    .map(|k| k.env_var())
                    .unwrap_or("?");
                format!("{v} (set {env})")
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;

    if report.valid {
        Ok(0)
    } else {
        Err(CliError::Config(
            ConfigError {
                violations: report.violations,
            }
            .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_missing_and_placeholder_keys() {
        let connection = ConnectionConfig::new()
            .with(ConnectionKey::ApiKey, "YOUR_API_KEY")
            .with(ConnectionKey::ProjectId, "demo");
        let report = inspect(&connection);

        assert!(!report.valid);
        assert!(report.present.contains(&"projectId"));
        let keys: Vec<&str> = report.violations.iter().map(|v| v.key.as_str()).collect();
        assert!(keys.contains(&"apiKey"));
        assert!(keys.contains(&"authDomain"));
        assert!(!keys.contains(&"measurementId"));
    }
}
