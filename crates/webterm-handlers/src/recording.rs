// Debug capture files
//
// Capture files live in the logs directory and are named after the target:
// `{name}.dump_{kind}_{out|in}.txt`.

use std::path::{Path, PathBuf};

use crate::params::SessionParams;
use crate::pipeline::DebugTee;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDirection {
    /// Backend to frontend
    Output,
    /// Frontend to backend
    Input,
}

impl CaptureDirection {
    fn suffix(self) -> &'static str {
        match self {
            CaptureDirection::Output => "out",
            CaptureDirection::Input => "in",
        }
    }
}

/// Where and when sessions are captured.
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub logs_dir: PathBuf,
    /// Capture every session, not only requests with `debug=true`.
    pub always: bool,
}

impl CaptureConfig {
    pub fn new(logs_dir: impl Into<PathBuf>, always: bool) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            always,
        }
    }

    pub fn enabled_for(&self, params: &SessionParams) -> bool {
        self.always || params.flag("debug")
    }

    pub fn path(&self, name: &str, kind: &str, direction: CaptureDirection) -> PathBuf {
        capture_path(&self.logs_dir, name, kind, direction)
    }

    /// Tees for both directions when capture is on for this request.
    pub fn open_pair(
        &self,
        params: &SessionParams,
        name: &str,
        kind: &str,
    ) -> (Option<DebugTee>, Option<DebugTee>) {
        if !self.enabled_for(params) {
            return (None, None);
        }
        (
            Some(DebugTee::open(self.path(name, kind, CaptureDirection::Output))),
            Some(DebugTee::open(self.path(name, kind, CaptureDirection::Input))),
        )
    }
}

pub fn capture_path(logs_dir: &Path, name: &str, kind: &str, direction: CaptureDirection) -> PathBuf {
    logs_dir.join(format!(
        "{}.dump_{}_{}.txt",
        sanitize(name),
        kind,
        direction.suffix()
    ))
}

/// Alias for a remote command capture: the `dump_file` parameter, or the
/// command with spaces replaced by `_`.
pub fn command_alias(command: &str, dump_file: Option<&str>) -> String {
    match dump_file.filter(|d| !d.is_empty()) {
        Some(alias) => alias.to_string(),
        None => command.replace(' ', "_"),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            c => c,
        })
        .collect()
}
