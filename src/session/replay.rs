//! Capture replay
//!
//! `/replay?file=<capture>` streams a debug capture back to the browser
//! through the charset transcoder. Only files inside the capture directory
//! are served.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;
use webterm_handlers::{
    default_charset, send_error_and_abort, send_error_best_effort, BackendHandler, CharsetTranscoder,
    FrontendChannel, HandlerError, Pipeline, SessionContext, SessionReport,
};

const READ_CHUNK_SIZE: usize = 8192;

/// Replays capture files from one directory.
pub struct ReplayHandler {
    /// Directory as configured, without `.` components.
    logs_dir: PathBuf,
    /// Same directory anchored at the working directory.
    root: PathBuf,
}

impl ReplayHandler {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        let logs_dir = without_cur_dir(&logs_dir.into());
        let root = if logs_dir.is_absolute() {
            logs_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&logs_dir))
                .unwrap_or_else(|_| logs_dir.clone())
        };
        Self { logs_dir, root }
    }

    /// Map the requested name onto the capture directory.
    ///
    /// Bare names are taken relative to the directory; paths already under it,
    /// spelled either way, are kept. Anything that leaves the directory is
    /// refused.
    fn resolve(&self, file: &str) -> Result<PathBuf, HandlerError> {
        let outside = || {
            HandlerError::InvalidParameter(format!("'{}' is outside the capture directory", file))
        };
        let requested = without_cur_dir(Path::new(file));
        if requested
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(outside());
        }

        if requested.is_absolute() {
            return match requested.strip_prefix(&self.root) {
                Ok(_) => Ok(requested),
                Err(_) => Err(outside()),
            };
        }
        let inner = match requested.strip_prefix(&self.logs_dir) {
            Ok(rest) if !self.logs_dir.as_os_str().is_empty() => rest,
            _ => requested.as_path(),
        };
        Ok(self.root.join(inner))
    }
}

fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[async_trait]
impl BackendHandler for ReplayHandler {
    fn name(&self) -> &str {
        "replay"
    }

    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> webterm_handlers::Result<SessionReport> {
        let file = match ctx.params.require("file") {
            Ok(f) => f.to_string(),
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let path = match self.resolve(&file) {
            Ok(p) => p,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let charset = ctx
            .params
            .get_non_empty("charset")
            .unwrap_or(default_charset())
            .to_string();
        let transcoder = match CharsetTranscoder::new(&charset) {
            Ok(t) => t,
            Err(e) => {
                let err = HandlerError::InvalidParameter(e.to_string());
                return Err(send_error_and_abort(frontend.sender(), err).await);
            }
        };
        let mut pipeline = Pipeline::new().with_stage(transcoder);

        let mut capture = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                let message = format!("open '{}' failed: {}", file, e);
                warn!("Replay: {}", message);
                send_error_best_effort(frontend.sender(), &message).await;
                return Err(HandlerError::SetupFailed(message));
            }
        };
        debug!("Replay: streaming {} as {}", path.display(), charset);

        let mut report = SessionReport::default();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = tokio::select! {
                read = capture.read(&mut buf) => match read {
                    Ok(n) => n,
                    Err(e) => {
                        frontend.diagnostic(&format!("copy of stdout failed: {}", e)).await;
                        return Err(HandlerError::IoError(e));
                    }
                },
                _ = ctx.timer.expired() => {
                    report.timed_out = true;
                    break;
                }
            };
            if n == 0 {
                break;
            }

            let data = match pipeline.process(Bytes::copy_from_slice(&buf[..n])) {
                Ok(d) => d,
                Err(e) => {
                    frontend.diagnostic(&format!("copy of stdout failed: {}", e)).await;
                    return Err(e.into());
                }
            };
            match ctx.timer.within(frontend.send(data)).await {
                Some(Ok(())) => {}
                Some(Err(_)) => {
                    debug!("Replay: frontend closed");
                    break;
                }
                None => {
                    report.timed_out = true;
                    break;
                }
            }
        }

        if let Err(e) = pipeline.finish() {
            debug!("Replay: {}", e);
        }
        Ok(report)
    }
}
