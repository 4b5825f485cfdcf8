//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// The engine stopped on a fatal error
    #[error("Engine stopped: {0}")]
    Engine(#[from] dispatcher::RuntimeError),

    /// Demo client setup error
    #[error("Client '{package}' failed: {source}")]
    Client {
        package: String,
        #[source]
        source: contracts::EngineError,
    },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn client(package: impl Into<String>, source: contracts::EngineError) -> Self {
        Self::Client {
            package: package.into(),
            source,
        }
    }
}
