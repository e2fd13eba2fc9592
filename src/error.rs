//! Error types for loading connection configuration.
//!
//! Connection failures are not represented here: `open` and `close` return
//! the driver's own error type unchanged.

use thiserror::Error;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while assembling connection configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable not found.
    #[error("environment variable not found: {0}")]
    EnvNotFound(String),

    /// Invalid environment variable value.
    #[error("invalid environment variable '{name}': {message}")]
    InvalidEnvValue { name: String, message: String },

    /// TOML parsing error.
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create an invalid environment value error.
    pub fn invalid_env(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvValue {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Check if this error was caused by a missing environment variable.
    pub fn is_missing_env(&self) -> bool {
        matches!(self, Self::EnvNotFound(_))
    }
}
