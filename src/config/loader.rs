//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts]\nproxy_request_secs = 7").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.timeouts.proxy_request_secs, 7);
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse_config(include_str!("../../aggregator-proxy.example.toml")).unwrap();
        assert_eq!(config.api_services.len(), 2);
        assert!(config.api_services[0].is_available());
        assert!(config.api_services[1].spec.service.is_none());
        assert!(config.client_cert.is_some());
    }

    #[test]
    fn error_kinds() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/aggregator.toml")),
            Err(ConfigError::Io(_))
        ));
        assert!(matches!(parse_config("listener = 5"), Err(ConfigError::Parse(_))));

        let err = parse_config("[timeouts]\nproxy_request_secs = 0").unwrap_err();
        assert!(err.to_string().contains("timeouts.proxy_request_secs"));
    }
}
