use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{PipelineError, StageEvent, StreamStage};

/// Best-effort copy of one session direction into a capture file.
///
/// The file is created fresh (truncated) when the stage is built. If it cannot
/// be opened, or a later write fails, capture for this direction stops and the
/// stream keeps flowing.
pub struct DebugTee {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl DebugTee {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let writer = match File::create(&path) {
            Ok(file) => {
                log::debug!("Debug capture enabled: {}", path.display());
                Some(BufWriter::new(file))
            }
            Err(e) => {
                log::warn!("Debug capture disabled for {}: {}", path.display(), e);
                None
            }
        };
        Self { path, writer }
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a chunk without putting the tee in a pipeline.
    pub fn record(&mut self, data: &[u8]) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write_all(data) {
                log::warn!("Debug capture to {} stopped: {}", self.path.display(), e);
                self.writer = None;
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                log::warn!("Failed to flush {}: {}", self.path.display(), e);
            }
        }
    }
}

impl StreamStage for DebugTee {
    fn name(&self) -> &'static str {
        "tee"
    }

    fn process(&mut self, chunk: Bytes, _events: &mut Vec<StageEvent>) -> Result<Bytes, PipelineError> {
        self.record(&chunk);
        Ok(chunk)
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        self.close();
        Ok(())
    }
}

impl Drop for DebugTee {
    fn drop(&mut self) {
        self.close();
    }
}
