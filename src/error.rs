//! Error types for the gateway

use thiserror::Error;
use webterm_handlers::HandlerError;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener could not bind
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Backend error surfaced outside a session
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Logging subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

/// Result type alias for GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;
