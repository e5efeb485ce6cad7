//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::OrchestratorConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GUARD_";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: String, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, value } => {
                write!(f, "Invalid value for {}{}: '{}'", ENV_PREFIX, key, value)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Apply `GUARD_*` overrides from `lookup` and re-validate.
pub fn apply_overrides<F>(
    mut config: OrchestratorConfig,
    lookup: F,
) -> Result<OrchestratorConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
        value.trim().parse().map_err(|_| ConfigError::Env {
            key: key.to_string(),
            value,
        })
    }

    let get = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

    if let Some(v) = get("DEFAULT_TIMEOUT_MS") {
        config.dispatch.default_timeout_ms = parsed("DEFAULT_TIMEOUT_MS", v)?;
    }
    if let Some(v) = get("ESCALATION_ENABLED") {
        config.escalation.enabled = parsed("ESCALATION_ENABLED", v)?;
    }
    if let Some(v) = get("ESCALATION_URL") {
        config.escalation.target_url = v;
    }
    if let Some(v) = get("DISCOVERY_INTERVAL_SECS") {
        config.discovery.interval_secs = parsed("DISCOVERY_INTERVAL_SECS", v)?;
    }
    if let Some(v) = get("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.observability.log_level = v;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load from `path` if given (defaults otherwise), then apply process environment overrides.
pub fn load_with_env(path: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    let config = match path {
        Some(p) => load_config(p)?,
        None => OrchestratorConfig::default(),
    };
    apply_overrides(config, |key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[services]]
            name = "token_guard"
            base_url = "http://127.0.0.1:7002/optimize"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.services[0].name, "token_guard");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_config("[retries\nmax_attempts = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error_is_reported() {
        let err = parse_config("[retries]\nmax_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("retries.max_attempts"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GUARD_DEFAULT_TIMEOUT_MS", "2500"),
            ("GUARD_ESCALATION_ENABLED", "true"),
            ("GUARD_ESCALATION_URL", "http://127.0.0.1:9000/analyze"),
        ]
        .into_iter()
        .collect();

        let config = apply_overrides(OrchestratorConfig::default(), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.dispatch.default_timeout_ms, 2500);
        assert!(config.escalation.enabled);
    }

    #[test]
    fn test_bad_env_value() {
        let err = apply_overrides(OrchestratorConfig::default(), |k| {
            (k == "GUARD_DEFAULT_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("GUARD_DEFAULT_TIMEOUT_MS"));
    }
}
