use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HandlerError, Result};

/// Upper bound on indexed `argN` parameters.
pub const MAX_INDEXED_ARGS: usize = 1000;

/// Request parameters of one session.
///
/// Keys may repeat (`arg0=a&arg0=b`); values keep their arrival order.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    values: HashMap<String, Vec<String>>,
}

impl SessionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (k, v) in pairs {
            params.insert(k, v);
        }
        params
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// First non-empty value for `key`.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get_non_empty(key)
            .ok_or_else(|| HandlerError::MissingParameter(key.to_string()))
    }

    /// `true` only for a case-insensitive "true".
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// `true` only for a case-insensitive "on".
    pub fn switch(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("on"))
            .unwrap_or(false)
    }

    /// Parsed value, falling back to `default` when absent or unparsable.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Duration such as `90s`, `10m` or `1h30m`. Unparsable values are ignored.
    pub fn duration(&self, key: &str) -> Option<Duration> {
        let raw = self.get_non_empty(key)?;
        match humantime::parse_duration(raw.trim()) {
            Ok(d) => Some(d),
            Err(e) => {
                log::debug!("Ignoring {}={:?}: {}", key, raw, e);
                None
            }
        }
    }

    /// Positional arguments from `arg0`, `arg1`, ... up to the first gap.
    pub fn indexed_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for i in 0..MAX_INDEXED_ARGS {
            match self.values.get(&format!("arg{}", i)) {
                Some(values) => args.extend(values.iter().cloned()),
                None => break,
            }
        }
        args
    }
}
