//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration loading or validation error
    #[error("Invalid configuration: {0}")]
    Config(#[from] contracts::ContractError),

    /// No API token from configuration, flag or environment
    #[error("Mist API key missing: set mist.api_key, --api-key or MIST_API_KEY")]
    MissingApiKey,

    /// The selected mode has nothing to run
    #[error("No {mode} datasources configured")]
    NoSources { mode: &'static str },

    /// Sink setup error
    #[error("Failed to start sinks: {0}")]
    Dispatcher(#[from] dispatcher::DispatcherError),

    /// Source setup error
    #[error("Failed to start source: {0}")]
    Ingestion(#[from] ingestion::IngestionError),

    /// Graceful shutdown error
    #[error("Error during shutdown: {message}")]
    Shutdown { message: String },

    /// Generic error wrapper
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
