use bytes::Bytes;

use super::{PipelineError, StageEvent, StreamStage};

/// Diagnostic printed by plink when it gives up on an unconfirmed host key.
pub const CONNECTION_ABANDONED_MARKER: &str = "Connection abandoned.";

/// One-shot literal marker detector over a passthrough stream.
///
/// Every chunk is returned unchanged. Until the first match the watcher keeps
/// at most `marker.len()` bytes of lookback so a marker split across chunks is
/// still found; after the match it stops scanning.
pub struct PatternWatcher {
    marker: &'static str,
    lookback: Vec<u8>,
    matched: bool,
}

impl PatternWatcher {
    pub fn new(marker: &'static str) -> Self {
        Self {
            marker,
            lookback: Vec::with_capacity(marker.len() * 2),
            matched: false,
        }
    }

    pub fn connection_abandoned() -> Self {
        Self::new(CONNECTION_ABANDONED_MARKER)
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    pub fn lookback_len(&self) -> usize {
        self.lookback.len()
    }

    fn found(&self, haystack: &[u8]) -> bool {
        let needle = self.marker.as_bytes();
        needle.is_empty()
            || haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn scan(&mut self, chunk: &[u8]) -> bool {
        let m = self.marker.len();

        if chunk.len() > m {
            if self.found(chunk) {
                return true;
            }
            // Marker straddling the previous tail and this chunk's head.
            let tail = &self.lookback[self.lookback.len().saturating_sub(m - 1)..];
            let mut boundary = Vec::with_capacity(2 * m);
            boundary.extend_from_slice(tail);
            boundary.extend_from_slice(&chunk[..m - 1]);
            if self.found(&boundary) {
                return true;
            }
            self.lookback.clear();
            self.lookback.extend_from_slice(&chunk[chunk.len() - m..]);
            return false;
        }

        self.lookback.extend_from_slice(chunk);
        if self.lookback.len() >= m {
            if self.found(&self.lookback) {
                return true;
            }
            let excess = self.lookback.len() - m;
            self.lookback.drain(..excess);
        }
        false
    }
}

impl StreamStage for PatternWatcher {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn process(&mut self, chunk: Bytes, events: &mut Vec<StageEvent>) -> Result<Bytes, PipelineError> {
        if !self.matched && self.scan(&chunk) {
            log::debug!("Marker {:?} seen in backend output", self.marker);
            self.matched = true;
            self.lookback = Vec::new();
            events.push(StageEvent::MarkerMatched {
                marker: self.marker,
            });
        }
        Ok(chunk)
    }
}
