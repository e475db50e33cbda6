//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Missing or malformed driver parameter
    #[error("sink '{sink}' parameter '{param}': {message}")]
    InvalidParam {
        sink: String,
        param: String,
        message: String,
    },

    /// No route configured for the record's stream
    #[error("sink '{sink}' has no route for stream '{stream}'")]
    UnknownRoute { sink: String, stream: String },

    /// Write failed, reconnected, and the retry failed too
    #[error("sink '{sink}' write to '{destination}' failed after retry: {source}")]
    RetryExhausted {
        sink: String,
        destination: String,
        #[source]
        source: contracts::ContractError,
    },

    /// Sink error (from contract)
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_param(
        sink: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParam {
            sink: sink.into(),
            param: param.into(),
            message: message.into(),
        }
    }
}
