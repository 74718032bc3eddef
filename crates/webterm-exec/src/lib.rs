// webterm-exec: Local process backend for the web terminal gateway
//
// Runs allow-listed local tools with their merged output relayed to the
// browser. Covers the `/cmd`, `/cmd2` and `/plink` endpoints, plink to
// OpenSSH argument translation, and the detached credential retry run after
// plink abandons a connection.

mod allow_list;
mod handler;
mod invocation;
mod openssh;
mod retry;

pub use allow_list::{
    CommandTable, CommandTableBuilder, SearchPaths, LOGS_DIR_CANDIDATES, MIBS_DIR_CANDIDATES,
};
pub use handler::{ExecConfig, ExecHandler};
pub use invocation::{build as build_invocation, is_plink, ExecMode, Invocation, InvocationOptions};
pub use openssh::{translate as translate_openssh, OpenSshCommand};
pub use retry::{strip_batch, CredentialRetry, AFFIRMATIVE_ANSWERS, DEFAULT_RETRY_TIMEOUT};

use thiserror::Error;
use webterm_handlers::HandlerError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} pipe was not available")]
    PipeUnavailable(&'static str),

    #[error("Handler error: {0}")]
    HandlerError(#[from] HandlerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;

impl From<ExecError> for HandlerError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::SpawnFailed { .. } | ExecError::PipeUnavailable(_) => {
                HandlerError::SetupFailed(err.to_string())
            }
            ExecError::HandlerError(e) => e,
            ExecError::IoError(e) => HandlerError::IoError(e),
        }
    }
}
