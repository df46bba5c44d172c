//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment overrides, validate.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    let config = apply_env_overrides(config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay deployment settings read through `lookup`.
///
/// Recognised variables: `GATEWAY_API_KEY`, `GATEWAY_BASE_URL`, `GATEWAY_BIND_ADDRESS`,
/// `GATEWAY_ASYNC_TASKS`, `GATEWAY_LOG_LEVEL`, `GATEWAY_REDIS_URL`.
pub fn apply_env_overrides<F>(mut config: GatewayConfig, lookup: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("GATEWAY_API_KEY").filter(|k| !k.trim().is_empty()) {
        config.downstream.api_key = Some(key.trim().to_string());
    }
    if let Some(url) = lookup("GATEWAY_BASE_URL") {
        config.downstream.base_url = url;
    }
    if let Some(addr) = lookup("GATEWAY_BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(value) = lookup("GATEWAY_ASYNC_TASKS") {
        config.tasks.async_enabled = parse_bool(&value).ok_or(ConfigError::Env {
            var: "GATEWAY_ASYNC_TASKS",
            value,
        })?;
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(url) = lookup("GATEWAY_REDIS_URL") {
        config.rate_limit.redis_url = url;
    }
    Ok(config)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let config = apply_env_overrides(
            GatewayConfig::default(),
            env(&[
                ("GATEWAY_API_KEY", " secret "),
                ("GATEWAY_ASYNC_TASKS", "false"),
                ("GATEWAY_LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(config.downstream.api_key.as_deref(), Some("secret"));
        assert!(!config.tasks.async_enabled);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_bad_bool_is_rejected() {
        let err = apply_env_overrides(GatewayConfig::default(), env(&[("GATEWAY_ASYNC_TASKS", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "GATEWAY_ASYNC_TASKS", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gateway-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[tasks]\nworkers = 2\n[retries]\nmax_attempts = 5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tasks.workers, 2);
        assert_eq!(config.retries.max_attempts, 5);

        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let path = std::env::temp_dir().join(format!("gateway-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[tasks]\nworkers = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("tasks.workers"));

        fs::remove_file(&path).unwrap_or_default();
    }
}
