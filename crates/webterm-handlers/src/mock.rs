use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::frontend::FrontendChannel;
use crate::handler::BackendHandler;
use crate::session::{SessionContext, SessionReport};

/// Echoing backend for registry tests
pub struct MockBackendHandler {
    name: String,
    connect_count: Arc<AtomicU64>,
    echoed: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl MockBackendHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connect_count: Arc::new(AtomicU64::new(0)),
            echoed: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn echoed(&self) -> Vec<u8> {
        self.echoed.lock().clone()
    }
}

#[async_trait]
impl BackendHandler for MockBackendHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(
        &self,
        _ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> Result<SessionReport> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        while let Some(chunk) = frontend.recv().await {
            self.echoed.lock().extend_from_slice(&chunk);
            frontend.send(chunk).await?;
        }

        Ok(SessionReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SessionParams;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_mock_echoes_until_close() {
        let handler = MockBackendHandler::new("echo");
        let (mut fe, mut client_rx, client_tx) = FrontendChannel::pair(4);
        let mut ctx = SessionContext::new("t", SessionParams::new(), None);

        client_tx.send(Bytes::from_static(b"hi")).await.unwrap();
        drop(client_tx);
        handler.connect(&mut ctx, &mut fe).await.unwrap();

        assert_eq!(handler.connect_count(), 1);
        assert_eq!(handler.echoed(), b"hi");
        assert_eq!(&client_rx.recv().await.unwrap()[..], b"hi");
    }
}
