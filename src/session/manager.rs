//! Session lifecycle
//!
//! One call to [`SessionManager::run`] is one browser session: resolve the
//! backend for the route, start the deadline, hand over the frontend, then
//! tear down and act on whatever the backend reported.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;
use webterm_exec::CredentialRetry;
use webterm_handlers::{
    send_error_and_abort, BackendRegistry, FrontendChannel, HandlerError, SessionContext, SessionEvent,
    SessionParams, SessionReport,
};

/// What a finished session left behind.
#[derive(Debug)]
pub struct SessionOutcome {
    pub id: String,
    pub route: String,
    pub result: Result<SessionReport, HandlerError>,
    /// Detached credential retries started after the session closed.
    pub retries: Vec<JoinHandle<()>>,
}

/// Owns the backend registry and runs sessions against it.
pub struct SessionManager {
    registry: Arc<BackendRegistry>,
    retry: CredentialRetry,
    active: Arc<AtomicUsize>,
}

/// Decrements the live session count on every exit path.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionManager {
    pub fn new(registry: Arc<BackendRegistry>, retry: CredentialRetry) -> Self {
        Self {
            registry,
            retry,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn routes(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Deadline for a request: `timeout` when it parses, else the backend's.
    pub fn resolve_timeout(params: &SessionParams, fallback: Option<Duration>) -> Option<Duration> {
        params.duration("timeout").or(fallback)
    }

    /// Run one session to completion. The frontend is closed exactly once,
    /// after the backend returned.
    pub async fn run(&self, route: &str, params: SessionParams, mut frontend: FrontendChannel) -> SessionOutcome {
        let id = Uuid::new_v4().to_string();
        let _active = ActiveGuard::enter(&self.active);

        let handler = match self.registry.get(route) {
            Some(h) => h,
            None => {
                let err = send_error_and_abort(
                    frontend.sender(),
                    HandlerError::InvalidParameter(format!("unknown endpoint '{}'", route)),
                )
                .await;
                frontend.close();
                return SessionOutcome {
                    id,
                    route: route.to_string(),
                    result: Err(err),
                    retries: Vec::new(),
                };
            }
        };

        let timeout = Self::resolve_timeout(&params, handler.default_timeout());
        info!(
            session = %id,
            route = route,
            host = params.get("hostname").or(params.get("exec")).unwrap_or("-"),
            timeout = ?timeout,
            "Session started"
        );

        let mut ctx = SessionContext::new(id.clone(), params, timeout);
        let result = handler.connect(&mut ctx, &mut frontend).await;
        ctx.timer.disarm();
        frontend.close();

        let mut retries = Vec::new();
        match &result {
            Ok(report) => {
                info!(
                    session = %id,
                    exit_status = ?report.exit_status,
                    timed_out = report.timed_out,
                    "Session closed"
                );
                for event in &report.events {
                    retries.push(self.handle_event(&id, event));
                }
            }
            Err(e) if e.is_setup() => {
                warn!(session = %id, "Session setup failed: {}", e);
            }
            Err(HandlerError::Disconnected(reason)) => {
                debug!(session = %id, "Session ended by peer: {}", reason);
            }
            Err(e) => {
                warn!(session = %id, "Session ended with error: {}", e);
            }
        }

        SessionOutcome {
            id,
            route: route.to_string(),
            result,
            retries,
        }
    }

    fn handle_event(&self, id: &str, event: &SessionEvent) -> JoinHandle<()> {
        match event {
            SessionEvent::ConnectionAbandoned {
                program,
                args,
                working_dir,
            } => {
                info!(
                    session = %id,
                    "Connection abandoned by {}, retrying detached to accept the host key",
                    program.display()
                );
                self.retry
                    .spawn(program.clone(), args.clone(), working_dir.clone())
            }
        }
    }
}
