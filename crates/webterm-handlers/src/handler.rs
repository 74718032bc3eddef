use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::frontend::FrontendChannel;
use crate::session::{SessionContext, SessionReport};

/// Backend transport handler
///
/// Every backend (interactive shell, single remote command, raw line session,
/// local process) implements this trait. The session owner resolves the
/// parameters and the deadline, then hands the handler the frontend channel
/// for the whole session.
///
/// # Contract
///
/// - Setup failures (dial, auth, not allow-listed, ...) are written to the
///   frontend as one diagnostic line before the error is returned.
/// - The handler returns once either side ends or `ctx.timer` fires; it
///   never closes the frontend itself.
/// - A fired timer forcibly terminates the backend.
///
/// # Example
///
/// ```no_run
/// use async_trait::async_trait;
/// use webterm_handlers::{BackendHandler, FrontendChannel, Result, SessionContext, SessionReport};
///
/// struct Echo;
///
/// #[async_trait]
/// impl BackendHandler for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn connect(
///         &self,
///         _ctx: &mut SessionContext,
///         frontend: &mut FrontendChannel,
///     ) -> Result<SessionReport> {
///         while let Some(chunk) = frontend.recv().await {
///             frontend.send(chunk).await?;
///         }
///         Ok(SessionReport::default())
///     }
/// }
/// ```
#[async_trait]
pub trait BackendHandler: Send + Sync {
    /// Route name (e.g. "ssh", "telnet", "cmd")
    fn name(&self) -> &str;

    /// Deadline applied when the request carries no `timeout`.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the session until one side ends or the deadline fires.
    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> Result<SessionReport>;
}
