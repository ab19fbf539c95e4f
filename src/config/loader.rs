//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

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

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let config = parse_config(
            r#"
            [[listeners]]
            name = "business"
            bind_address = "127.0.0.1:8080"

            [[listeners]]
            name = "admin"
            bind_address = "localhost:8081"
            request_timeout_secs = 5

            [shutdown]
            drain_wait_ms = 0
            callback_timeout_ms = 200

            [observability]
            json_logs = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listeners[1].request_timeout_secs, 5);
        assert_eq!(config.shutdown.callback_timeout_ms, 200);
        assert!(config.observability.json_logs);
    }

    #[test]
    fn missing_listeners_fail_validation() {
        let err = parse_config("[shutdown]\ndrain_wait_ms = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("at least one listener"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = parse_config("[[listeners]\nname =").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/nonexistent/graceful-app.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
