// Connection utilities for backend handlers

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::HandlerError;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 15;

/// Connect to a TCP endpoint with timeout
///
/// # Arguments
/// * `addr` - The address to connect to (hostname:port or (hostname, port))
/// * `timeout_secs` - Connection timeout in seconds (0 = OS default)
///
/// # Returns
/// * `Ok(TcpStream)` - Connected stream with TCP_NODELAY enabled
/// * `Err(HandlerError::ConnectionFailed)` - Connection failed or timed out
pub async fn connect_tcp_with_timeout<A: tokio::net::ToSocketAddrs>(
    addr: A,
    timeout_secs: u64,
) -> Result<TcpStream, HandlerError> {
    let stream = if timeout_secs > 0 {
        timeout(Duration::from_secs(timeout_secs), TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                HandlerError::ConnectionFailed(format!(
                    "connection timed out after {} seconds",
                    timeout_secs
                ))
            })?
            .map_err(|e| HandlerError::ConnectionFailed(e.to_string()))?
    } else {
        TcpStream::connect(&addr)
            .await
            .map_err(|e| HandlerError::ConnectionFailed(e.to_string()))?
    };

    // Interactive keystrokes go out one by one
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("Failed to set TCP_NODELAY: {}", e);
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = connect_tcp_with_timeout(addr, 5).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = connect_tcp_with_timeout(addr, 5).await.unwrap_err();
        assert!(matches!(err, HandlerError::ConnectionFailed(_)));
        assert!(err.is_setup());
    }
}
