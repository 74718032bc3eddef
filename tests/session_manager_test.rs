// Session lifecycle tests against scripted backends

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webterm_exec::CredentialRetry;
use webterm_gateway::SessionManager;
use webterm_handlers::{
    BackendHandler, BackendRegistry, FrontendChannel, HandlerError, SessionContext, SessionEvent,
    SessionParams, SessionReport,
};

/// What the scripted backend does once connected.
#[derive(Clone)]
enum Script {
    Greet(&'static str),
    Fail,
    Abandon(SessionEvent),
    WaitForClose,
}

struct ScriptedHandler {
    script: Script,
    default_timeout: Option<Duration>,
    seen_timeout: mpsc::UnboundedSender<Option<Duration>>,
}

#[async_trait]
impl BackendHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> webterm_handlers::Result<SessionReport> {
        let _ = self.seen_timeout.send(ctx.timer.duration());
        match &self.script {
            Script::Greet(text) => {
                frontend.send(Bytes::from_static(text.as_bytes())).await?;
                Ok(SessionReport::with_exit_status(Some(0)))
            }
            Script::Fail => {
                frontend.diagnostic("Command 'rm' is not allowed").await;
                Err(HandlerError::NotAllowed("rm".to_string()))
            }
            Script::Abandon(event) => Ok(SessionReport {
                exit_status: Some(1),
                timed_out: false,
                events: vec![event.clone()],
            }),
            Script::WaitForClose => {
                while frontend.recv().await.is_some() {}
                Ok(SessionReport::default())
            }
        }
    }
}

fn manager_with(
    script: Script,
    default_timeout: Option<Duration>,
) -> (SessionManager, mpsc::UnboundedReceiver<Option<Duration>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = BackendRegistry::new();
    registry.register_as(
        "scripted",
        Arc::new(ScriptedHandler {
            script,
            default_timeout,
            seen_timeout: tx,
        }),
    );
    (
        SessionManager::new(Arc::new(registry), CredentialRetry::new(Duration::from_secs(5))),
        rx,
    )
}

async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    out
}

#[tokio::test]
async fn test_unknown_route_reports_and_closes() {
    let (manager, _seen) = manager_with(Script::Greet("hi"), None);
    let (frontend, client_rx, _client_tx) = FrontendChannel::pair(8);

    let outcome = manager.run("nope", SessionParams::new(), frontend).await;
    assert!(outcome.result.unwrap_err().to_string().contains("unknown endpoint 'nope'"));

    let received = String::from_utf8(drain(client_rx).await).unwrap();
    assert!(received.contains("unknown endpoint 'nope'"));
    assert!(received.ends_with("\r\n"));
}

#[tokio::test]
async fn test_frontend_closed_after_session() {
    let (manager, _seen) = manager_with(Script::Greet("hello\r\n"), None);
    let (frontend, client_rx, _client_tx) = FrontendChannel::pair(8);

    let outcome = manager.run("scripted", SessionParams::new(), frontend).await;
    assert_eq!(outcome.route, "scripted");
    assert!(!outcome.id.is_empty());
    assert_eq!(outcome.result.unwrap().exit_status, Some(0));

    // drain() only returns once every sender is gone.
    assert_eq!(drain(client_rx).await, b"hello\r\n");
    assert_eq!(manager.active_sessions(), 0);
}

#[tokio::test]
async fn test_request_timeout_overrides_default() {
    let (manager, mut seen) = manager_with(Script::Greet(""), Some(Duration::from_secs(600)));

    let (frontend, _rx, _tx) = FrontendChannel::pair(8);
    let params = SessionParams::from_pairs([("timeout", "5s")]);
    manager.run("scripted", params, frontend).await;
    assert_eq!(seen.recv().await.unwrap(), Some(Duration::from_secs(5)));

    let (frontend, _rx, _tx) = FrontendChannel::pair(8);
    manager.run("scripted", SessionParams::new(), frontend).await;
    assert_eq!(seen.recv().await.unwrap(), Some(Duration::from_secs(600)));

    let (frontend, _rx, _tx) = FrontendChannel::pair(8);
    let params = SessionParams::from_pairs([("timeout", "whenever")]);
    manager.run("scripted", params, frontend).await;
    assert_eq!(seen.recv().await.unwrap(), Some(Duration::from_secs(600)));
}

#[tokio::test]
async fn test_setup_failure_is_reported_once() {
    let (manager, _seen) = manager_with(Script::Fail, None);
    let (frontend, client_rx, _client_tx) = FrontendChannel::pair(8);

    let outcome = manager.run("scripted", SessionParams::new(), frontend).await;
    let err = outcome.result.unwrap_err();
    assert!(err.is_setup());
    assert!(outcome.retries.is_empty());
    assert_eq!(drain(client_rx).await, b"Command 'rm' is not allowed\r\n");
}

#[tokio::test]
async fn test_session_ends_when_browser_leaves() {
    let (manager, _seen) = manager_with(Script::WaitForClose, None);
    let (frontend, client_rx, client_tx) = FrontendChannel::pair(8);

    client_tx.send(Bytes::from_static(b"ls\r")).await.unwrap();
    drop(client_tx);
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        manager.run("scripted", SessionParams::new(), frontend),
    )
    .await
    .unwrap();
    assert!(outcome.result.is_ok());
    assert!(drain(client_rx).await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_abandoned_connection_starts_detached_retry() {
    let dir = tempfile::TempDir::new().unwrap();
    let seen = dir.path().join("answers.txt");
    let event = SessionEvent::ConnectionAbandoned {
        program: "/bin/sh".into(),
        args: vec![
            "-c".to_string(),
            format!("cat > {}", seen.display()),
            "-batch".to_string(),
        ],
        working_dir: Some(dir.path().to_path_buf()),
    };

    let (manager, _seen) = manager_with(Script::Abandon(event), None);
    let (frontend, _rx, _tx) = FrontendChannel::pair(8);
    let outcome = manager.run("scripted", SessionParams::new(), frontend).await;
    assert_eq!(outcome.retries.len(), 1);

    for handle in outcome.retries {
        handle.await.unwrap();
    }
    assert_eq!(
        std::fs::read_to_string(&seen).unwrap(),
        webterm_exec::AFFIRMATIVE_ANSWERS
    );
}
