use bytes::Bytes;
use log::{error, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Failed to dial: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Command '{0}' is not allowed")]
    NotAllowed(String),

    #[error("Temporary file error: {0}")]
    TempFile(String),

    #[error("Session setup failed: {0}")]
    SetupFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stream error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Disconnected: {0}")]
    Disconnected(String),
}

impl HandlerError {
    /// Errors raised before any byte was relayed.
    ///
    /// Setup errors are reported to the frontend as one diagnostic line and
    /// end the session without retry.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            HandlerError::ConnectionFailed(_)
                | HandlerError::AuthenticationFailed(_)
                | HandlerError::MissingParameter(_)
                | HandlerError::InvalidParameter(_)
                | HandlerError::NotAllowed(_)
                | HandlerError::TempFile(_)
                | HandlerError::SetupFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;

/// Format a diagnostic line as the terminal renders it.
pub fn diagnostic_line(message: &str) -> Bytes {
    let mut line = String::with_capacity(message.len() + 2);
    line.push_str(message);
    if !message.ends_with('\n') {
        line.push_str("\r\n");
    }
    Bytes::from(line)
}

/// Log a setup failure, write it to the frontend and hand the error back
/// for propagation.
///
/// # Example
/// ```ignore
/// let stream = match connect_tcp_with_timeout((host, port), 15).await {
///     Ok(s) => s,
///     Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
/// };
/// ```
pub async fn send_error_and_abort(to_client: &mpsc::Sender<Bytes>, err: HandlerError) -> HandlerError {
    match &err {
        HandlerError::MissingParameter(_)
        | HandlerError::InvalidParameter(_)
        | HandlerError::NotAllowed(_) => warn!("Rejected session: {}", err),
        _ => error!("Session setup failed: {}", err),
    }

    let _ = to_client.send(diagnostic_line(&err.to_string())).await;
    err
}

/// Write a diagnostic line to the frontend, ignoring a closed channel.
///
/// Used on paths that are already ending, where the client may be gone.
pub async fn send_error_best_effort(to_client: &mpsc::Sender<Bytes>, message: &str) {
    let _ = to_client.send(diagnostic_line(message)).await;
}
