//! WebSocket binding for the frontend channel
//!
//! Every frame the browser sends, text or binary, becomes one chunk of
//! session input. Session output goes out as binary frames; once the session
//! drops its sender a Close frame follows.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use webterm_handlers::{FrontendChannel, SessionParams, FRONTEND_CHANNEL_CAPACITY};

use crate::session::{SessionManager, SessionOutcome};

/// Bridge an upgraded socket to a session on `route`.
pub async fn serve_socket(
    socket: WebSocket,
    manager: Arc<SessionManager>,
    route: String,
    query: Vec<(String, String)>,
) -> SessionOutcome {
    let (mut sink, mut stream) = socket.split();
    let (frontend, mut to_client, from_client) = FrontendChannel::pair(FRONTEND_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(chunk) = to_client.recv().await {
            if let Err(e) = sink.send(Message::Binary(chunk)).await {
                debug!("WebSocket: write failed: {}", e);
                return;
            }
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            trace!("WebSocket: close frame not sent: {}", e);
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let data = match frame {
                Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                Ok(Message::Binary(data)) => data,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("WebSocket: read failed: {}", e);
                    break;
                }
            };
            if data.is_empty() {
                continue;
            }
            if from_client.send(data).await.is_err() {
                break;
            }
        }
    });

    let params = SessionParams::from_pairs(query);
    let outcome = manager.run(&route, params, frontend).await;

    // The writer drains whatever the session left, then sends Close.
    if let Err(e) = writer.await {
        debug!("WebSocket: writer task ended abnormally: {}", e);
    }
    reader.abort();
    outcome
}
