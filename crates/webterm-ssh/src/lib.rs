// webterm-ssh: SSH backends for the web terminal gateway
//
// Two handlers share dial and authentication: SshShellHandler opens a PTY and
// an interactive shell, SshExecHandler runs one command without a PTY.
// Authentication tries the request password first, then relays
// keyboard-interactive challenges to the browser.
//
// # Example
//
// ```no_run
// use webterm_ssh::{SshConfig, SshShellHandler};
// use webterm_handlers::{BackendHandler, FrontendChannel, SessionContext, SessionParams};
//
// #[tokio::main]
// async fn main() {
//     let handler = SshShellHandler::new(SshConfig::default());
//
//     let params = SessionParams::from_pairs([
//         ("hostname", "example.com"),
//         ("user", "admin"),
//         ("password", "secret"),
//     ]);
//
//     let (mut frontend, _to_browser, _from_browser) = FrontendChannel::pair(64);
//     let mut ctx = SessionContext::new("demo", params, None);
//     handler.connect(&mut ctx, &mut frontend).await.unwrap();
// }
// ```

mod algorithms;
mod auth;
mod handler;

pub use algorithms::{SshAlgorithms, SUPPORTED_CIPHERS, SUPPORTED_KEY_EXCHANGES};
pub use auth::{AuthStep, Challenge, InteractiveAuthRelay, KeyboardInteractive, MAX_EMPTY_ROUNDS};
pub use handler::{SshConfig, SshExecHandler, SshShellHandler};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("SSH connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SSH authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Handler error: {0}")]
    HandlerError(#[from] webterm_handlers::HandlerError),

    #[error("SSH error: {0}")]
    SshError(#[from] russh::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SshError>;

impl From<SshError> for webterm_handlers::HandlerError {
    fn from(err: SshError) -> Self {
        use webterm_handlers::HandlerError;
        match err {
            SshError::ConnectionFailed(msg) => HandlerError::ConnectionFailed(msg),
            SshError::AuthenticationFailed(msg) => HandlerError::AuthenticationFailed(msg),
            SshError::HandlerError(e) => e,
            SshError::SshError(e) => HandlerError::ProtocolError(e.to_string()),
            SshError::IoError(e) => HandlerError::IoError(e),
        }
    }
}
