//! Configuration module
//!
//! Handles loading and parsing the gateway configuration from YAML files.

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use types::*;
