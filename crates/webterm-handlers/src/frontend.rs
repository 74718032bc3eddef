// Frontend channel
//
// The browser side of a session as a pair of byte channels. The websocket
// binding owns the other ends; dropping the to-client sender closes the
// socket.

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::{diagnostic_line, HandlerError, Result};

/// Default capacity for the frontend channels.
pub const FRONTEND_CHANNEL_CAPACITY: usize = 256;

/// Longest answer line accepted from the frontend.
pub const MAX_LINE_LEN: usize = 4096;

pub struct FrontendChannel {
    to_client: mpsc::Sender<Bytes>,
    from_client: mpsc::Receiver<Bytes>,
    pending: BytesMut,
    skip_lf: bool,
    bytes_sent: u64,
    bytes_received: u64,
}

impl FrontendChannel {
    pub fn new(to_client: mpsc::Sender<Bytes>, from_client: mpsc::Receiver<Bytes>) -> Self {
        Self {
            to_client,
            from_client,
            pending: BytesMut::new(),
            skip_lf: false,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Build a channel plus the far ends, as the websocket binding and tests use it.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Bytes>, mpsc::Sender<Bytes>) {
        let (to_client, client_rx) = mpsc::channel(capacity);
        let (client_tx, from_client) = mpsc::channel(capacity);
        (Self::new(to_client, from_client), client_rx, client_tx)
    }

    pub fn sender(&self) -> &mpsc::Sender<Bytes> {
        &self.to_client
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Forward bytes to the client. Fails once the client is gone.
    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len() as u64;
        self.to_client
            .send(data)
            .await
            .map_err(|_| HandlerError::Disconnected("frontend closed".to_string()))?;
        self.bytes_sent += len;
        Ok(())
    }

    /// Write a diagnostic line, ignoring a closed client.
    pub async fn diagnostic(&self, message: &str) {
        let _ = self.to_client.send(diagnostic_line(message)).await;
    }

    /// Write a diagnostic line only if there is room for it right now.
    ///
    /// For paths ending on a deadline, where the client may have stopped
    /// reading. Returns whether the line was queued.
    pub fn try_diagnostic(&self, message: &str) -> bool {
        self.to_client.try_send(diagnostic_line(message)).is_ok()
    }

    /// Next chunk from the client, `None` once it closed.
    ///
    /// Bytes left over from [`read_line`](Self::read_line) come first.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.drop_pending_lf();
        if !self.pending.is_empty() {
            return Some(self.pending.split().freeze());
        }
        let mut chunk = self.from_client.recv().await?;
        self.bytes_received += chunk.len() as u64;
        if std::mem::take(&mut self.skip_lf) && chunk.first() == Some(&b'\n') {
            chunk.advance(1);
        }
        Some(chunk)
    }

    fn drop_pending_lf(&mut self) {
        if self.skip_lf && !self.pending.is_empty() {
            if self.pending[0] == b'\n' {
                self.pending.advance(1);
            }
            self.skip_lf = false;
        }
    }

    /// Read one line typed by the client, without its terminator.
    ///
    /// Accepts `\r`, `\n` or `\r\n`. Bytes after the terminator stay buffered
    /// for the next read.
    pub async fn read_line(&mut self) -> Result<String> {
        loop {
            self.drop_pending_lf();

            if let Some(pos) = self.pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
                let line = self.pending.split_to(pos);
                let terminator = self.pending[0];
                self.pending.advance(1);
                self.skip_lf = terminator == b'\r';
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            if self.pending.len() > MAX_LINE_LEN {
                return Err(HandlerError::InvalidParameter(format!(
                    "answer longer than {} bytes",
                    MAX_LINE_LEN
                )));
            }

            match self.from_client.recv().await {
                Some(chunk) => {
                    self.bytes_received += chunk.len() as u64;
                    self.pending.extend_from_slice(&chunk);
                }
                None => {
                    return Err(HandlerError::Disconnected(
                        "frontend closed while waiting for input".to_string(),
                    ))
                }
            }
        }
    }

    /// Close the client side. Consumes the channel so it happens once.
    pub fn close(self) {
        log::debug!(
            "Closing frontend channel ({} bytes out, {} bytes in)",
            self.bytes_sent,
            self.bytes_received
        );
    }
}
