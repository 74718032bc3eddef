//! webterm-gateway - Browser-facing terminal gateway
//!
//! This library wires the backend crates into a websocket server:
//! - Loads the YAML configuration and builds the command allow-list
//! - Registers the SSH, telnet, local process and replay backends
//! - Runs each browser session through the [`SessionManager`], which owns
//!   the deadline, closes the frontend and starts credential retries

#[macro_use]
mod logging;

pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use gateway::{build_command_table, build_registry, locate_directories, Gateway};
pub use logging::init_logging;
pub use session::{ReplayHandler, SessionManager, SessionOutcome};
