//! Configuration loader

use super::Config;
use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a YAML file
///
/// Also applies WEBTERM_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies WEBTERM_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = if yaml.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(GatewayError::Config)?;
    Ok(config)
}

/// Apply WEBTERM_* environment variable overrides to a config.
///
/// Supported env vars:
/// - `WEBTERM_LISTEN` - Override listen address
/// - `WEBTERM_STATIC_DIR` - Override static file directory
/// - `WEBTERM_DEBUG` - Capture every session (`true`/`1`)
/// - `WEBTERM_LOGS_DIR` - Override capture directory
/// - `WEBTERM_CONNECT_TIMEOUT_SECS` - Override connect timeout
/// - `WEBTERM_EXEC_TIMEOUT` - Override process deadline (`10m`, `90s`, ...)
/// - `WEBTERM_SHELL` - Override fallback interpreter
/// - `WEBTERM_LOG_LEVEL` - Override log level
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("WEBTERM_LISTEN") {
        debug!("Overriding server.listen from WEBTERM_LISTEN");
        config.server.listen = val;
    }
    if let Some(val) = lookup("WEBTERM_STATIC_DIR") {
        debug!("Overriding server.static_dir from WEBTERM_STATIC_DIR");
        config.server.static_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("WEBTERM_DEBUG") {
        debug!("Overriding session.debug from WEBTERM_DEBUG");
        config.session.debug = matches!(val.trim(), "1" | "true" | "on");
    }
    if let Some(val) = lookup("WEBTERM_LOGS_DIR") {
        debug!("Overriding session.logs_dir from WEBTERM_LOGS_DIR");
        config.session.logs_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("WEBTERM_CONNECT_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse::<u64>() {
            debug!("Overriding session.connect_timeout_secs from WEBTERM_CONNECT_TIMEOUT_SECS");
            config.session.connect_timeout_secs = secs;
        }
    }
    if let Some(val) = lookup("WEBTERM_EXEC_TIMEOUT") {
        if let Ok(timeout) = humantime::parse_duration(val.trim()) {
            debug!("Overriding session.exec_timeout from WEBTERM_EXEC_TIMEOUT");
            config.session.exec_timeout = timeout;
        }
    }
    if let Some(val) = lookup("WEBTERM_SHELL") {
        debug!("Overriding exec.shell from WEBTERM_SHELL");
        config.exec.shell = val;
    }
    if let Some(val) = lookup("WEBTERM_LOG_LEVEL") {
        debug!("Overriding log level from WEBTERM_LOG_LEVEL");
        config.logging.level = val;
    }
}

/// Resolve environment variables in a string value
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - curly brace syntax
/// - `$VAR_NAME` - simple syntax (for single variable values)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    let var_name = if value.starts_with("${") && value.ends_with('}') {
        &value[2..value.len() - 1]
    } else if value.starts_with('$') && !value.contains(' ') && value.len() > 1 {
        &value[1..]
    } else {
        return value.to_string();
    };

    match std::env::var(var_name) {
        Ok(env_value) => {
            debug!("Resolved env var {} from config", var_name);
            env_value
        }
        Err(_) => {
            debug!("Env var {} not set, keeping original value", var_name);
            value.to_string()
        }
    }
}

fn resolve_env_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(resolve_env_var(s)),
        None => path.to_path_buf(),
    }
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    config.server.listen = resolve_env_var(&config.server.listen);
    if let Some(ref dir) = config.server.static_dir {
        config.server.static_dir = Some(resolve_env_path(dir));
    }

    config.session.logs_dir = resolve_env_path(&config.session.logs_dir);

    config.exec.shell = resolve_env_var(&config.exec.shell);
    for path in config.exec.commands.values_mut() {
        *path = resolve_env_path(path);
    }
    for dir in config.exec.search_dirs.iter_mut() {
        *dir = resolve_env_path(dir);
    }
    if let Some(ref dir) = config.exec.mibs_dir {
        config.exec.mibs_dir = Some(resolve_env_path(dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_load_config_empty_document() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:37079");
        assert!(config.server.static_dir.is_none());
        assert_eq!(config.session.connect_timeout_secs, 15);
        assert_eq!(config.session.exec_timeout, Duration::from_secs(600));
        assert_eq!(config.session.plink_timeout, Duration::from_secs(3600));
        assert_eq!(config.session.retry_timeout, Duration::from_secs(60));
        assert!(config.exec.discover_defaults);
    }

    #[test]
    fn test_load_config_full() {
        let yaml = r#"
server:
  listen: "127.0.0.1:9000"
  static_dir: ./static

session:
  debug: true
  logs_dir: /var/log/webterm
  connect_timeout_secs: 5
  exec_timeout: 90s
  plink_timeout: 2h
  retry_timeout: 30s

ssh:
  ciphers: [aes256-ctr, aes128-cbc]
  key_exchanges: [diffie-hellman-group14-sha1]

exec:
  shell: /bin/sh
  search_dirs: [/opt/tools]
  commands:
    ping: /bin/ping
  discover: [traceroute]
  discover_defaults: false
  trusted_prefixes: [/opt/webterm/scripts]
  mibs_dir: /usr/share/snmp/mibs

logging:
  level: debug
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.static_dir, Some(PathBuf::from("./static")));
        assert!(config.session.debug);
        assert_eq!(config.session.logs_dir, PathBuf::from("/var/log/webterm"));
        assert_eq!(config.session.exec_timeout, Duration::from_secs(90));
        assert_eq!(config.session.plink_timeout, Duration::from_secs(7200));
        assert_eq!(config.ssh.ciphers, vec!["aes256-ctr", "aes128-cbc"]);
        assert_eq!(config.exec.shell, "/bin/sh");
        assert_eq!(config.exec.commands.get("ping"), Some(&PathBuf::from("/bin/ping")));
        assert_eq!(config.exec.discover, vec!["traceroute"]);
        assert!(!config.exec.discover_defaults);
        assert_eq!(config.exec.mibs_dir, Some(PathBuf::from("/usr/share/snmp/mibs")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_listen_rejected() {
        let err = load_config_from_str("server:\n  listen: not-an-address\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("server.listen"));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = load_config_from_str("session:\n  exec_timeout: soon\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = load_config_from_str("session:\n  retry_timeout: 0s\n").unwrap_err();
        assert!(err.to_string().contains("session.retry_timeout"));
    }

    #[test]
    fn test_relative_trusted_prefix_rejected() {
        let err = load_config_from_str("exec:\n  trusted_prefixes: [scripts]\n").unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let err = load_config_from_str("exec:\n  commands: [ping]\n").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("WEBTERM_LISTEN", "127.0.0.1:1"),
            ("WEBTERM_DEBUG", "1"),
            ("WEBTERM_LOGS_DIR", "/tmp/caps"),
            ("WEBTERM_CONNECT_TIMEOUT_SECS", "3"),
            ("WEBTERM_EXEC_TIMEOUT", "2m"),
            ("WEBTERM_SHELL", "sh"),
            ("WEBTERM_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides_from(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.listen, "127.0.0.1:1");
        assert!(config.session.debug);
        assert_eq!(config.session.logs_dir, PathBuf::from("/tmp/caps"));
        assert_eq!(config.session.connect_timeout_secs, 3);
        assert_eq!(config.session.exec_timeout, Duration::from_secs(120));
        assert_eq!(config.exec.shell, "sh");
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_unparsable_override_ignored() {
        let mut config = Config::default();
        apply_overrides_from(&mut config, |key| {
            (key == "WEBTERM_CONNECT_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert_eq!(config.session.connect_timeout_secs, 15);
    }

    #[test]
    fn test_resolve_env_var() {
        std::env::set_var("WEBTERM_TEST_RESOLVE_DIR", "/srv/caps");
        assert_eq!(resolve_env_var("${WEBTERM_TEST_RESOLVE_DIR}"), "/srv/caps");
        assert_eq!(resolve_env_var("$WEBTERM_TEST_RESOLVE_DIR"), "/srv/caps");
        assert_eq!(resolve_env_var("plain"), "plain");
        assert_eq!(
            resolve_env_var("${WEBTERM_TEST_RESOLVE_UNSET}"),
            "${WEBTERM_TEST_RESOLVE_UNSET}"
        );
        std::env::remove_var("WEBTERM_TEST_RESOLVE_DIR");
    }

    #[test]
    fn test_paths_resolved_from_env() {
        std::env::set_var("WEBTERM_TEST_PING_PATH", "/usr/bin/ping");
        let config = load_config_from_str(
            "exec:\n  commands:\n    ping: ${WEBTERM_TEST_PING_PATH}\n",
        )
        .unwrap();
        assert_eq!(config.exec.commands.get("ping"), Some(&PathBuf::from("/usr/bin/ping")));
        std::env::remove_var("WEBTERM_TEST_PING_PATH");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("webterm.yaml");
        std::fs::write(&path, "server:\n  listen: \"127.0.0.1:8080\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");

        let err = load_config(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, GatewayError::Io(_)));
    }
}
