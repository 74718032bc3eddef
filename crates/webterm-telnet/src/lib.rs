// webterm-telnet: Raw line session backend for the web terminal gateway
//
// # Example
//
// ```no_run
// use webterm_telnet::TelnetHandler;
// use webterm_handlers::{BackendHandler, FrontendChannel, SessionContext, SessionParams};
//
// #[tokio::main]
// async fn main() {
//     let handler = TelnetHandler::with_defaults();
//
//     let params = SessionParams::from_pairs([("hostname", "switch-01"), ("charset", "GB18030")]);
//     let mut ctx = SessionContext::new("demo", params, None);
//     let (mut frontend, _client_rx, _client_tx) = FrontendChannel::pair(16);
//
//     handler.connect(&mut ctx, &mut frontend).await.unwrap();
//     frontend.close();
// }
// ```

mod handler;
mod protocol;

pub use handler::{TelnetConfig, TelnetHandler};
pub use protocol::{escape_iac, naws_negotiation, naws_size_report, Decoded, TelnetDecoder, OPT_NAWS};

use thiserror::Error;
use webterm_handlers::HandlerError;

#[derive(Error, Debug)]
pub enum TelnetError {
    #[error("Telnet negotiation failed: {0}")]
    NegotiationFailed(std::io::Error),

    #[error("Handler error: {0}")]
    HandlerError(#[from] HandlerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TelnetError>;

impl From<TelnetError> for HandlerError {
    fn from(err: TelnetError) -> Self {
        match err {
            TelnetError::NegotiationFailed(e) => HandlerError::SetupFailed(format!(
                "failed to create connection: {}",
                e
            )),
            TelnetError::HandlerError(e) => e,
            TelnetError::IoError(e) => HandlerError::IoError(e),
        }
    }
}
