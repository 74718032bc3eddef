//! Configuration types

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
///
/// Every section is optional; an empty document yields the defaults.
///
/// ```yaml
/// server:
///   listen: "0.0.0.0:37079"
///   static_dir: "./static"
///
/// session:
///   debug: false
///   logs_dir: "./logs"
///   exec_timeout: 10m
///
/// ssh:
///   ciphers: ["aes128-ctr", "aes256-ctr"]
///
/// exec:
///   shell: bash
///   commands:
///     ping: /bin/ping
///   discover: [traceroute]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub ssh: SshSection,

    #[serde(default)]
    pub exec: ExecSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.server
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid server.listen '{}': {}", self.server.listen, e))?;

        if self.session.connect_timeout_secs == 0 {
            return Err("session.connect_timeout_secs must be greater than zero".to_string());
        }
        for (name, value) in [
            ("session.exec_timeout", self.session.exec_timeout),
            ("session.plink_timeout", self.session.plink_timeout),
            ("session.retry_timeout", self.session.retry_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("{} must be greater than zero", name));
            }
        }

        if self.exec.shell.trim().is_empty() {
            return Err("exec.shell must not be empty".to_string());
        }
        for (name, path) in &self.exec.commands {
            if name.trim().is_empty() {
                return Err("exec.commands contains an empty name".to_string());
            }
            if path.as_os_str().is_empty() {
                return Err(format!("exec.commands.{} has an empty path", name));
            }
        }
        for prefix in &self.exec.trusted_prefixes {
            if !prefix.is_absolute() {
                return Err(format!(
                    "exec.trusted_prefixes entry '{}' must be absolute",
                    prefix.display()
                ));
            }
        }

        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Serve this directory at `/` next to the websocket routes
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_listen() -> String {
    "0.0.0.0:37079".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            static_dir: None,
        }
    }
}

/// Session defaults shared by every backend
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Capture every session, not only `debug=true` requests
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_exec_timeout", deserialize_with = "deserialize_duration")]
    pub exec_timeout: Duration,

    #[serde(default = "default_plink_timeout", deserialize_with = "deserialize_duration")]
    pub plink_timeout: Duration,

    #[serde(default = "default_retry_timeout", deserialize_with = "deserialize_duration")]
    pub retry_timeout: Duration,
}

/// Capture directory when none is configured; also triggers discovery.
pub const DEFAULT_LOGS_DIR: &str = "logs";

fn default_logs_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOGS_DIR)
}

fn default_connect_timeout() -> u64 {
    webterm_handlers::DEFAULT_CONNECTION_TIMEOUT_SECS
}

fn default_exec_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_plink_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_retry_timeout() -> Duration {
    webterm_exec::DEFAULT_RETRY_TIMEOUT
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            logs_dir: default_logs_dir(),
            connect_timeout_secs: default_connect_timeout(),
            exec_timeout: default_exec_timeout(),
            plink_timeout: default_plink_timeout(),
            retry_timeout: default_retry_timeout(),
        }
    }
}

/// Algorithm preference overrides for the SSH backends
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SshSection {
    /// Ciphers tried first, in order; the remaining supported ones follow
    #[serde(default)]
    pub ciphers: Vec<String>,

    #[serde(default)]
    pub key_exchanges: Vec<String>,
}

/// Local process execution and the command allow-list
#[derive(Debug, Clone, Deserialize)]
pub struct ExecSection {
    /// Interpreter for programs that cannot be executed directly
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Extra roots searched before `PATH` during discovery
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,

    /// Explicit name to path entries
    #[serde(default)]
    pub commands: BTreeMap<String, PathBuf>,

    /// Names looked up on disk at start
    #[serde(default)]
    pub discover: Vec<String>,

    /// Also discover the bundled network tools (snmp*, plink, nmap, ...)
    #[serde(default = "default_true")]
    pub discover_defaults: bool,

    /// Absolute executables under these directories are allowed by path
    #[serde(default)]
    pub trusted_prefixes: Vec<PathBuf>,

    /// Passed as `-M <dir>` to snmp tools
    #[serde(default)]
    pub mibs_dir: Option<PathBuf>,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ExecSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            search_dirs: Vec::new(),
            commands: BTreeMap::new(),
            discover: Vec::new(),
            discover_defaults: true,
            trusted_prefixes: Vec::new(),
            mibs_dir: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Human readable durations such as `90s`, `10m` or `1h 30m`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}
