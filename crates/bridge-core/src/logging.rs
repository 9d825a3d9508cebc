//! Logging setup for the bridge binary.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{BridgeError, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Application name to include in logs
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            app_name: "amibridge".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Set up the logging system with the provided configuration
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let result = if config.json {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        fmt::Subscriber::builder().with_env_filter(filter).try_init()
    };

    result.map_err(|error| BridgeError::config(format!("Failed to set up logging: {}", error)))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level)
        .map_err(|_| BridgeError::config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert!(parse_log_level("chatty").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json);
    }
}
