//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides the transport API key.
pub const ENV_TRANSPORT_API_KEY: &str = "MCP_TRANSPORT_API_KEY";
/// Overrides the live feed API key.
pub const ENV_REALTIME_API_KEY: &str = "MCP_REALTIME_API_KEY";
/// Overrides the transport endpoint.
pub const ENV_TRANSPORT_ENDPOINT: &str = "MCP_TRANSPORT_ENDPOINT";

/// Why a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Every problem found, not just the first.
    #[error("invalid configuration: {}", list(.0))]
    Invalid(Vec<ValidationError>),
}

fn list(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&content)?;
    tracing::debug!(path = ?path, "Configuration loaded");
    Ok(config)
}

/// Parse, apply environment overrides, then validate.
pub fn parse_config(content: &str) -> Result<ClientConfig, ConfigError> {
    let mut config: ClientConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Invalid)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated.
pub fn default_config() -> Result<ClientConfig, ConfigError> {
    parse_config("")
}

/// Secrets and the endpoint may come from the environment instead of the file.
pub fn apply_env_overrides<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup(ENV_TRANSPORT_API_KEY).filter(|v| !v.is_empty()) {
        config.transport.api_key = Some(key);
    }
    if let Some(key) = lookup(ENV_REALTIME_API_KEY).filter(|v| !v.is_empty()) {
        config.realtime.api_key = Some(key);
    }
    if let Some(endpoint) = lookup(ENV_TRANSPORT_ENDPOINT).filter(|v| !v.is_empty()) {
        config.transport.endpoint = endpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = ClientConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            ENV_TRANSPORT_API_KEY => Some("from-env".to_string()),
            ENV_TRANSPORT_ENDPOINT => Some("http://10.0.0.1:9600/mcp".to_string()),
            ENV_REALTIME_API_KEY => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.transport.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.transport.endpoint, "http://10.0.0.1:9600/mcp");
        assert_eq!(config.realtime.api_key, None);
    }

    #[test]
    fn invalid_file_reports_validation_errors() {
        let err = parse_config("[realtime]\nbuffer_capacity = 0\n").unwrap_err();
        match err {
            ConfigError::Invalid(errors) => {
                assert!(errors.iter().any(|e| e.field == "realtime.buffer_capacity"))
            }
            other => panic!("expected validation error, got {}", other),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(parse_config("[transport"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn errors_name_the_file_and_every_field() {
        let err = load_config(Path::new("/nonexistent/mcp-transport.toml")).unwrap_err();
        assert!(err.to_string().starts_with("cannot read /nonexistent/mcp-transport.toml"));

        let err = parse_config(
            "[transport]\nendpoint = \"ftp://host/mcp\"\n[realtime]\nurl = \"http://host/ws/traces\"\n",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("invalid configuration: transport.endpoint"));
        assert!(message.contains("; realtime.url"));
    }
}
