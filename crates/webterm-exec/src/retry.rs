// Credential retry
//
// plink run with `-batch` refuses unknown host keys and prints
// "Connection abandoned.". After such a session the same command is run once
// more, detached and without `-batch`, answering `y` to every prompt so the
// key gets cached for the next request. Nothing is reported back.

use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Answers fed to the detached run.
pub const AFFIRMATIVE_ANSWERS: &str = "y\ny\ny\ny\ny\ny\ny\ny\n";

/// Deadline for the detached run.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Remove every `-batch` flag, any case.
pub fn strip_batch(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|a| !a.eq_ignore_ascii_case("-batch"))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct CredentialRetry {
    timeout: Duration,
}

impl Default for CredentialRetry {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_TIMEOUT)
    }
}

impl CredentialRetry {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fire and forget.
    pub fn spawn(
        &self,
        program: PathBuf,
        args: Vec<String>,
        working_dir: Option<PathBuf>,
    ) -> JoinHandle<()> {
        let retry = self.clone();
        tokio::spawn(async move {
            match retry.run(&program, &args, working_dir.as_deref()).await {
                Ok(Some(status)) => info!("Credential retry of {} finished: {}", program.display(), status),
                Ok(None) => warn!(
                    "Credential retry of {} killed after {:?}",
                    program.display(),
                    retry.timeout
                ),
                Err(e) => warn!("Credential retry of {} failed: {}", program.display(), e),
            }
        })
    }

    /// Run once; `Ok(None)` when the deadline killed it.
    pub async fn run(
        &self,
        program: &std::path::Path,
        args: &[String],
        working_dir: Option<&std::path::Path>,
    ) -> std::io::Result<Option<ExitStatus>> {
        let args = strip_batch(args);
        debug!("Credential retry: {} ({} args)", program.display(), args.len());

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // The process may exit without reading everything.
            if let Err(e) = stdin.write_all(AFFIRMATIVE_ANSWERS.as_bytes()).await {
                debug!("Credential retry: stdin closed early: {}", e);
            }
        }

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!("Credential retry: kill after deadline: {}", e);
                }
                let _ = child.wait().await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_batch() {
        assert_eq!(
            strip_batch(&strings(&["-batch", "-pw", "x", "-BATCH", "root@h", "-Batch"])),
            strings(&["-pw", "x", "root@h"])
        );
        assert_eq!(strip_batch(&strings(&["--batch"])), strings(&["--batch"]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_answers_fed_and_batch_removed() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("seen.txt");
        let script = format!("echo \"$@\" > {0}; cat >> {0}", out.display());

        let retry = CredentialRetry::default();
        let status = retry
            .run(
                std::path::Path::new("/bin/sh"),
                &strings(&["-c", &script, "plink", "-batch", "root@h"]),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(status.success());

        let seen = std::fs::read_to_string(&out).unwrap();
        assert_eq!(seen, format!("root@h\n{}", AFFIRMATIVE_ANSWERS));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills() {
        let retry = CredentialRetry::new(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = retry
            .run(
                std::path::Path::new("/bin/sh"),
                &strings(&["-c", "sleep 30"]),
                None,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_missing_program_does_not_panic() {
        let retry = CredentialRetry::default();
        let handle = retry.spawn(PathBuf::from("/nonexistent/plink"), vec![], None);
        handle.await.unwrap();
    }
}
