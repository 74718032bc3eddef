//! Session lifecycle and the gateway's own backends

mod manager;
mod replay;

pub use manager::{SessionManager, SessionOutcome};
pub use replay::ReplayHandler;
