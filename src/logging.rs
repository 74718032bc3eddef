//! Logging macros that set target to "webterm_gateway" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g. "webterm_gateway::server::websocket"). These macros keep every
//! record from this crate under one target so `RUST_LOG=webterm_gateway=debug`
//! selects all of it. The handler crates log through `log` and reach the same
//! subscriber through the `tracing-log` bridge.

#![allow(unused_macros)]

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "webterm_gateway", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "webterm_gateway", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "webterm_gateway", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "webterm_gateway", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "webterm_gateway", $($arg)*) };
}

use tracing_subscriber::EnvFilter;

use crate::error::{GatewayError, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies, or `debug` for this
/// crate and the backends when `verbose` is on. Records from the `log`
/// facade used by the backend crates are forwarded too.
pub fn init_logging(level: &str, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(format!(
                "{},webterm_gateway=debug,webterm_handlers=debug,webterm_ssh=debug,webterm_telnet=debug,webterm_exec=debug",
                level
            ))
        } else {
            EnvFilter::new(level)
        }
    });
    let filter_str = filter.to_string();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| GatewayError::Logging(e.to_string()))?;

    debug!("Logger initialized (effective filter: {})", filter_str);
    Ok(())
}
