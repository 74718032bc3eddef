// Stream pipeline
//
// A session direction is a chain of byte-stream stages (transcode -> watch ->
// tee). Each stage takes a chunk and returns the bytes to hand to the next
// stage; chunks carry no framing and may split characters or markers anywhere.
// Stages report side effects as StageEvent values collected by the pipeline
// and drained by the session owner.

mod tee;
mod transcode;
mod watch;

pub use tee::DebugTee;
pub use transcode::{
    default_charset, CharsetTranscoder, InputEncoder, CANONICAL_CHARSET,
};
pub use watch::{PatternWatcher, CONNECTION_ABANDONED_MARKER};

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown charset: {0}")]
    UnknownCharset(String),

    #[error("Malformed {charset} input at byte {offset}")]
    Malformed { charset: &'static str, offset: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Side effect reported by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// A watched marker appeared in the stream. Reported at most once per watcher.
    MarkerMatched { marker: &'static str },
}

/// One step of a session direction.
pub trait StreamStage: Send {
    fn name(&self) -> &'static str;

    /// Transform one chunk. An empty return means the stage is holding bytes.
    fn process(&mut self, chunk: Bytes, events: &mut Vec<StageEvent>) -> Result<Bytes, PipelineError>;

    /// Called once when the direction ends.
    fn finish(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Ordered composition of stages for one direction.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn StreamStage>>,
    events: Vec<StageEvent>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage<S: StreamStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push<S: StreamStage + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a chunk through every stage in order.
    ///
    /// Stops early once a stage holds everything back, so later stages never
    /// see empty chunks.
    pub fn process(&mut self, chunk: Bytes) -> Result<Bytes, PipelineError> {
        let mut data = chunk;
        for stage in self.stages.iter_mut() {
            if data.is_empty() {
                break;
            }
            data = stage.process(data, &mut self.events)?;
        }
        Ok(data)
    }

    /// Drain events raised since the last call.
    pub fn take_events(&mut self) -> Vec<StageEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn finish(&mut self) -> Result<(), PipelineError> {
        let mut first_err = None;
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.finish() {
                log::warn!("Stage {} failed to finish: {}", stage.name(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
