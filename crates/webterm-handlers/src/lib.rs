// webterm-handlers: Backend handler trait and stream plumbing for the web terminal gateway
//
// This crate defines the BackendHandler trait that every backend (SSH shell,
// SSH exec, telnet, local process) implements, the registry the session
// owner dispatches through, and the pieces each backend wires together:
// the frontend channel, the session deadline, and the per-direction stream
// pipeline (charset transcoding, marker watching, debug capture).

mod connection;
mod error;
mod frontend;
mod handler;
mod params;
pub mod pipeline;
mod recording;
mod registry;
mod session;

#[cfg(test)]
mod mock;

pub use connection::{connect_tcp_with_timeout, DEFAULT_CONNECTION_TIMEOUT_SECS};
pub use error::{diagnostic_line, send_error_and_abort, send_error_best_effort, HandlerError, Result};
pub use frontend::{FrontendChannel, FRONTEND_CHANNEL_CAPACITY, MAX_LINE_LEN};
pub use handler::BackendHandler;
pub use params::{SessionParams, MAX_INDEXED_ARGS};
pub use pipeline::{
    default_charset, CharsetTranscoder, DebugTee, InputEncoder, PatternWatcher, Pipeline,
    PipelineError, StageEvent, StreamStage, CANONICAL_CHARSET, CONNECTION_ABANDONED_MARKER,
};
pub use recording::{capture_path, command_alias, CaptureConfig, CaptureDirection};
pub use registry::BackendRegistry;
pub use session::{SessionContext, SessionEvent, SessionReport, SessionTimer};

#[cfg(test)]
pub use mock::MockBackendHandler;
