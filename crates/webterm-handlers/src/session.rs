use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::params::SessionParams;

/// Deadline for one session, running as its own task.
///
/// Once fired it stays fired; [`disarm`](Self::disarm) cancels a pending
/// deadline and is also run on drop, so no late kill outlives the session.
pub struct SessionTimer {
    duration: Option<Duration>,
    fired: Arc<AtomicBool>,
    rx: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionTimer {
    /// Start counting down `duration`; `None` never fires.
    pub fn start(duration: Option<Duration>) -> Self {
        let (tx, rx) = watch::channel(false);
        let fired = Arc::new(AtomicBool::new(false));

        let task = duration.map(|d| {
            let fired = Arc::clone(&fired);
            tokio::spawn(async move {
                tokio::time::sleep(d).await;
                fired.store(true, Ordering::SeqCst);
                log::info!("Session timeout of {} reached", humantime::format_duration(d));
                let _ = tx.send(true);
            })
        });

        Self {
            duration,
            fired,
            rx,
            task,
        }
    }

    pub fn unlimited() -> Self {
        Self::start(None)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves when the deadline passes; pending forever when disarmed or
    /// unlimited. Cancel safe.
    pub async fn expired(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone without firing: disarmed.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` until it completes or the deadline passes, whichever is
    /// first. `None` means the deadline won and `fut` was dropped.
    ///
    /// Relay loops wrap every await that can stall on a peer in this, so a
    /// full channel never hides the deadline.
    pub async fn within<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = self.expired() => None,
        }
    }

    /// Cancel a pending deadline. Harmless after firing.
    pub fn disarm(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                log::debug!("Session timer disarmed");
            }
            task.abort();
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Something a backend observed that the session owner acts on after close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// plink gave up on an unconfirmed host key; replay the command detached.
    ConnectionAbandoned {
        program: PathBuf,
        args: Vec<String>,
        working_dir: Option<PathBuf>,
    },
}

/// Outcome of a session that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    pub events: Vec<SessionEvent>,
}

impl SessionReport {
    pub fn with_exit_status(exit_status: Option<i32>) -> Self {
        Self {
            exit_status,
            ..Self::default()
        }
    }
}

/// Per-session input handed to a backend.
pub struct SessionContext {
    pub id: String,
    pub params: SessionParams,
    pub timer: SessionTimer,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, params: SessionParams, timeout: Option<Duration>) -> Self {
        Self {
            id: id.into(),
            params,
            timer: SessionTimer::start(timeout),
        }
    }
}
