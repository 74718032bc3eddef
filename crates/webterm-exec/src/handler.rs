use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webterm_handlers::{
    command_alias, default_charset, send_error_and_abort, BackendHandler, CaptureConfig,
    CharsetTranscoder, FrontendChannel, HandlerError, PatternWatcher, Pipeline, SessionContext,
    SessionEvent, SessionReport, StageEvent,
};

use crate::allow_list::CommandTable;
use crate::invocation::{self, ExecMode, Invocation, InvocationOptions};
use crate::ExecError;

const READ_CHUNK_SIZE: usize = 8192;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Settings shared by the local process endpoints.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub table: Arc<CommandTable>,
    /// Interpreter used when a program cannot be executed directly.
    pub shell: String,
    pub options: InvocationOptions,
    pub exec_timeout: Duration,
    pub plink_timeout: Duration,
    pub capture: CaptureConfig,
}

impl ExecConfig {
    pub fn new(table: Arc<CommandTable>) -> Self {
        Self {
            table,
            shell: "bash".to_string(),
            options: InvocationOptions::for_host(),
            exec_timeout: Duration::from_secs(10 * 60),
            plink_timeout: Duration::from_secs(60 * 60),
            capture: CaptureConfig::default(),
        }
    }
}

/// Local process backend. One instance per endpoint flavour.
pub struct ExecHandler {
    config: Arc<ExecConfig>,
    mode: ExecMode,
}

impl ExecHandler {
    pub fn new(config: Arc<ExecConfig>, mode: ExecMode) -> Self {
        Self { config, mode }
    }

    /// `/cmd`: program plus `arg0..` parameters.
    pub fn indexed(config: Arc<ExecConfig>) -> Self {
        Self::new(config, ExecMode::Indexed)
    }

    /// `/cmd2`: one shell-style command line.
    pub fn command_line(config: Arc<ExecConfig>) -> Self {
        Self::new(config, ExecMode::CommandLine)
    }

    /// `/plink`: interactive plink session.
    pub fn plink(config: Arc<ExecConfig>) -> Self {
        Self::new(config, ExecMode::Plink)
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    fn output_pipeline(
        &self,
        ctx: &SessionContext,
        inv: &Invocation,
    ) -> Result<(Pipeline, Option<webterm_handlers::DebugTee>), HandlerError> {
        let charset = ctx.params.get_non_empty("charset").unwrap_or(default_charset());
        let mut pipeline = Pipeline::new().with_stage(
            CharsetTranscoder::new(charset).map_err(|e| HandlerError::InvalidParameter(e.to_string()))?,
        );
        if inv.watch_abandoned {
            pipeline.push(PatternWatcher::connection_abandoned());
        }

        let (name, kind) = match self.mode {
            ExecMode::Plink => (ctx.params.get("hostname").unwrap_or_default().to_string(), "ssh"),
            _ => (command_alias(&inv.name, ctx.params.get("dump_file")), "cmd"),
        };
        let (out_tee, in_tee) = self.config.capture.open_pair(&ctx.params, &name, kind);
        if let Some(tee) = out_tee {
            pipeline.push(tee);
        }
        Ok((pipeline, in_tee))
    }
}

fn base_command(program: &Path, args: &[String], inv: &Invocation, stdin: bool) -> Command {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &inv.working_dir {
        command.current_dir(dir);
    }
    command
}

/// Start the process. A permission failure on Unix retries through the
/// shell with the program as its first argument; that path always gets
/// frontend input.
fn spawn(inv: &Invocation, shell: &str) -> crate::Result<(Child, bool)> {
    info!("Exec: {} {:?}", inv.program.display(), inv.args);
    match base_command(&inv.program, &inv.args, inv, inv.stdin).spawn() {
        Ok(child) => Ok((child, inv.stdin)),
        Err(e) if cfg!(unix) && e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(
                "Exec: {} not executable, running through {}",
                inv.program.display(),
                shell
            );
            let mut args = Vec::with_capacity(inv.args.len() + 1);
            args.push(inv.program.to_string_lossy().into_owned());
            args.extend(inv.args.iter().cloned());
            base_command(Path::new(shell), &args, inv, true)
                .spawn()
                .map(|child| (child, true))
                .map_err(|source| ExecError::SpawnFailed {
                    program: shell.to_string(),
                    source,
                })
        }
        Err(source) => Err(ExecError::SpawnFailed {
            program: inv.program.display().to_string(),
            source,
        }),
    }
}

fn spawn_reader<R>(mut reader: R, tx: mpsc::Sender<Bytes>, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Exec: {} read failed: {}", stream, e);
                    break;
                }
            }
        }
        trace!("Exec: {} closed", stream);
    })
}

fn spawn_writer(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Bytes>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                debug!("Exec: copy of stdin failed: {}", e);
                break;
            }
        }
    })
}

/// Kill and reap. The process may already be gone; that is not an error.
async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Exec: kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        debug!("Exec: wait after kill: {}", e);
    }
}

fn describe_exit(status: &ExitStatus) -> Option<String> {
    if status.success() {
        return None;
    }
    Some(match status.code() {
        Some(code) => format!("Process exited with status {}", code),
        None => format!("Process terminated ({})", status),
    })
}

enum Outcome {
    Exited,
    FrontendGone,
    TimedOut,
    Failed(Failure),
}

/// Error that ended a relay loop, by the step that raised it.
#[derive(Debug)]
enum Failure {
    /// Processing or forwarding process output.
    Output(HandlerError),
    /// Waiting on the child itself.
    Wait(std::io::Error),
}

impl Failure {
    /// Line written to the client before the session ends.
    fn diagnostic(&self) -> String {
        match self {
            Failure::Output(e) => format!("copy of stdout failed: {}", e),
            Failure::Wait(e) => format!("wait for process failed: {}", e),
        }
    }

    fn into_error(self) -> HandlerError {
        match self {
            Failure::Output(e) => e,
            Failure::Wait(e) => HandlerError::IoError(e),
        }
    }
}

#[async_trait]
impl BackendHandler for ExecHandler {
    fn name(&self) -> &str {
        match self.mode {
            ExecMode::Indexed => "cmd",
            ExecMode::CommandLine => "cmd2",
            ExecMode::Plink => "plink",
        }
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(match self.mode {
            ExecMode::Plink => self.config.plink_timeout,
            _ => self.config.exec_timeout,
        })
    }

    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> webterm_handlers::Result<SessionReport> {
        // Dropped at the end of the session, removing any script file.
        let inv = match invocation::build(self.mode, &ctx.params, &self.config.table, &self.config.options) {
            Ok(inv) => inv,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let (mut output, mut input_tee) = match self.output_pipeline(ctx, &inv) {
            Ok(p) => p,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let (mut child, stdin_enabled) = match spawn(&inv, &self.config.shell) {
            Ok(c) => c,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e.into()).await),
        };

        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);
        let mut tasks = Vec::with_capacity(3);
        if let Some(stdout) = child.stdout.take() {
            tasks.push(spawn_reader(stdout, out_tx.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(spawn_reader(stderr, out_tx.clone(), "stderr"));
        }
        drop(out_tx);

        let mut stdin_tx = match (stdin_enabled, child.stdin.take()) {
            (true, Some(stdin)) => {
                let (tx, rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);
                tasks.push(spawn_writer(stdin, rx));
                Some(tx)
            }
            _ => None,
        };

        let mut exit: Option<ExitStatus> = None;
        let mut output_open = true;

        let outcome = loop {
            if exit.is_some() && !output_open {
                break Outcome::Exited;
            }
            tokio::select! {
                chunk = out_rx.recv(), if output_open => match chunk {
                    Some(chunk) => {
                        let out = match output.process(chunk) {
                            Ok(out) => out,
                            Err(e) => break Outcome::Failed(Failure::Output(e.into())),
                        };
                        match ctx.timer.within(frontend.send(out)).await {
                            Some(Ok(())) => {}
                            Some(Err(_)) => break Outcome::FrontendGone,
                            None => break Outcome::TimedOut,
                        }
                    }
                    None => output_open = false,
                },

                input = frontend.recv(), if stdin_tx.is_some() => match input {
                    Some(data) => {
                        if let Some(tee) = input_tee.as_mut() {
                            tee.record(&data);
                        }
                        let delivered = match &stdin_tx {
                            Some(tx) => match ctx.timer.within(tx.send(data)).await {
                                Some(sent) => sent.is_ok(),
                                None => break Outcome::TimedOut,
                            },
                            None => false,
                        };
                        if !delivered {
                            debug!("Exec: process stopped reading input");
                            stdin_tx = None;
                        }
                    }
                    None => {
                        debug!("Exec: client closed input, closing stdin");
                        stdin_tx = None;
                    }
                },

                status = child.wait(), if exit.is_none() => match status {
                    Ok(status) => {
                        debug!("Exec: {} exited: {}", inv.name, status);
                        exit = Some(status);
                    }
                    Err(e) => break Outcome::Failed(Failure::Wait(e)),
                },

                _ = ctx.timer.expired() => break Outcome::TimedOut,
            }
        };

        drop(stdin_tx);
        if exit.is_none() {
            terminate(&mut child).await;
        }
        ctx.timer.disarm();
        for task in &tasks {
            task.abort();
        }
        let _ = output.finish();

        let mut report = SessionReport::with_exit_status(exit.and_then(|s| s.code()));
        let abandoned = output
            .take_events()
            .iter()
            .any(|e| matches!(e, StageEvent::MarkerMatched { .. }));
        if abandoned {
            info!("Exec: {} reported an abandoned connection", inv.program.display());
            report.events.push(SessionEvent::ConnectionAbandoned {
                program: inv.program.clone(),
                args: inv.args.clone(),
                working_dir: inv.working_dir.clone(),
            });
        }

        match outcome {
            Outcome::Exited => {
                if let Some(message) = exit.as_ref().and_then(describe_exit) {
                    frontend.diagnostic(&message).await;
                }
                Ok(report)
            }
            Outcome::FrontendGone => {
                info!("Exec: client gone, {} stopped", inv.name);
                Ok(report)
            }
            Outcome::TimedOut => {
                let limit = ctx
                    .timer
                    .duration()
                    .map(|d| format!(" after {:?}", d))
                    .unwrap_or_default();
                warn!("Exec: {} killed{}", inv.name, limit);
                frontend.try_diagnostic(&format!("Process killed{}", limit));
                report.timed_out = true;
                Ok(report)
            }
            Outcome::Failed(failure) => {
                let message = failure.diagnostic();
                error!("Exec: {} failed: {}", inv.name, message);
                frontend.diagnostic(&message).await;
                Err(failure.into_error())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::allow_list::SearchPaths;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use webterm_handlers::SessionParams;

    fn config(table: CommandTable) -> Arc<ExecConfig> {
        Arc::new(ExecConfig {
            shell: "/bin/sh".to_string(),
            ..ExecConfig::new(Arc::new(table))
        })
    }

    fn sh_table() -> CommandTable {
        CommandTable::builder(SearchPaths::only([]))
            .command("sh", "/bin/sh")
            .build()
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    async fn run(
        handler: &ExecHandler,
        params: SessionParams,
        timeout: Option<Duration>,
    ) -> (webterm_handlers::Result<SessionReport>, String) {
        let (mut fe, client_rx, _client_tx) = FrontendChannel::pair(64);
        let mut ctx = SessionContext::new("exec-test", params, timeout);
        let result = handler.connect(&mut ctx, &mut fe).await;
        fe.close();
        (result, drain(client_rx).await)
    }

    #[test]
    fn test_names_and_timeouts() {
        let cfg = config(sh_table());
        assert_eq!(ExecHandler::indexed(cfg.clone()).name(), "cmd");
        assert_eq!(ExecHandler::command_line(cfg.clone()).name(), "cmd2");
        let plink = ExecHandler::plink(cfg.clone());
        assert_eq!(plink.name(), "plink");
        assert_eq!(plink.default_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(
            ExecHandler::indexed(cfg).default_timeout(),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_merged_output() {
        let handler = ExecHandler::command_line(config(sh_table()));
        let params = SessionParams::from_pairs([("exec", "sh -c 'echo out; echo err 1>&2'")]);
        let (result, output) = run(&handler, params, None).await;

        let report = result.unwrap();
        assert_eq!(report.exit_status, Some(0));
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_not_allowed_rejected_before_spawn() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let handler = ExecHandler::indexed(config(sh_table()));
        let params = SessionParams::from_pairs([
            ("exec", "touch".to_string()),
            ("arg0", marker.to_string_lossy().to_string()),
        ]);
        let (result, output) = run(&handler, params, None).await;

        assert!(matches!(result, Err(HandlerError::NotAllowed(_))));
        assert_eq!(output, "Command 'touch' is not allowed\r\n");
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let handler = ExecHandler::command_line(config(sh_table()));
        let params = SessionParams::from_pairs([("exec", "sh -c 'sleep 30'")]);
        let started = std::time::Instant::now();
        let (result, output) = run(&handler, params, Some(Duration::from_millis(300))).await;

        let report = result.unwrap();
        assert!(report.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(output.starts_with("Process killed after"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reported() {
        let handler = ExecHandler::command_line(config(sh_table()));
        let params = SessionParams::from_pairs([("exec", "sh -c 'exit 3'")]);
        let (result, output) = run(&handler, params, None).await;
        assert_eq!(result.unwrap().exit_status, Some(3));
        assert_eq!(output, "Process exited with status 3\r\n");
    }

    #[tokio::test]
    async fn test_stdin_relayed() {
        let handler = ExecHandler::command_line(config(sh_table()));
        let (mut fe, client_rx, client_tx) = FrontendChannel::pair(8);
        let params = SessionParams::from_pairs([("exec", "sh -c 'cat'"), ("stdin", "on")]);
        let mut ctx = SessionContext::new("exec-stdin", params, Some(Duration::from_secs(10)));

        client_tx.send(Bytes::from_static(b"hello\n")).await.unwrap();
        drop(client_tx);
        let report = handler.connect(&mut ctx, &mut fe).await.unwrap();
        fe.close();

        assert!(!report.timed_out);
        assert_eq!(drain(client_rx).await, "hello\n");
    }

    #[tokio::test]
    async fn test_deadline_wins_over_stalled_stdin() {
        let handler = ExecHandler::command_line(config(sh_table()));
        let (mut fe, _client_rx, client_tx) = FrontendChannel::pair(8);
        let params = SessionParams::from_pairs([("exec", "sh -c 'sleep 20'"), ("stdin", "on")]);
        let mut ctx = SessionContext::new("exec-stalled-stdin", params, Some(Duration::from_millis(300)));

        // The child never reads, so the pipe and the writer queue fill up.
        let flood = tokio::spawn(async move {
            for _ in 0..1000 {
                if client_tx.send(Bytes::from(vec![b'x'; 4096])).await.is_err() {
                    break;
                }
            }
        });

        let report = tokio::time::timeout(Duration::from_secs(5), handler.connect(&mut ctx, &mut fe))
            .await
            .expect("session outlived its deadline")
            .unwrap();
        assert!(report.timed_out);
        assert_eq!(report.exit_status, None);

        drop(fe);
        flood.await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_wins_over_stalled_client() {
        let handler = ExecHandler::command_line(config(sh_table()));
        // The client never reads what the process prints.
        let (mut fe, _client_rx, _client_tx) = FrontendChannel::pair(8);
        let params = SessionParams::from_pairs([("exec", "sh -c 'while :; do echo flood; done'")]);
        let mut ctx = SessionContext::new("exec-stalled-client", params, Some(Duration::from_millis(300)));

        let report = tokio::time::timeout(Duration::from_secs(5), handler.connect(&mut ctx, &mut fe))
            .await
            .expect("session outlived its deadline")
            .unwrap();
        assert!(report.timed_out);
    }

    #[test]
    fn test_failure_diagnostics_name_the_failed_step() {
        let wait = Failure::Wait(std::io::Error::new(std::io::ErrorKind::Other, "no child processes"));
        assert_eq!(wait.diagnostic(), "wait for process failed: no child processes");
        assert!(matches!(wait.into_error(), HandlerError::IoError(_)));

        let output = Failure::Output(HandlerError::ProtocolError("broken pipe".into()));
        assert_eq!(output.diagnostic(), "copy of stdout failed: Protocol error: broken pipe");
    }

    #[tokio::test]
    async fn test_permission_denied_falls_back_to_shell() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("report.sh");
        std::fs::write(&script, "echo fallback \"$1\"\n").unwrap();

        let table = CommandTable::builder(SearchPaths::only([]))
            .command("report", &script)
            .build();
        let handler = ExecHandler::indexed(config(table));
        let params = SessionParams::from_pairs([("exec", "report"), ("arg0", "ok")]);
        let (result, output) = run(&handler, params, Some(Duration::from_secs(10))).await;

        assert_eq!(result.unwrap().exit_status, Some(0));
        assert_eq!(output, "fallback ok\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_setup_error() {
        let table = CommandTable::builder(SearchPaths::only([]))
            .command("ghost", "/nonexistent/ghost")
            .build();
        let handler = ExecHandler::indexed(config(table));
        let params = SessionParams::from_pairs([("exec", "ghost")]);
        let (result, output) = run(&handler, params, None).await;

        let err = result.unwrap_err();
        assert!(err.is_setup());
        assert!(output.contains("failed to start /nonexistent/ghost"));
    }

    #[tokio::test]
    async fn test_abandoned_connection_reported() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("plink");
        // Not executable, so it runs through the shell fallback.
        std::fs::write(
            &fake,
            "printf 'host key not cached\\r\\nConnection aban'\nprintf 'doned.\\r\\n'\nexit 1\n",
        )
        .unwrap();

        let table = CommandTable::builder(SearchPaths::only([]))
            .command("plink", &fake)
            .build();
        let handler = ExecHandler::plink(config(table));
        let params = SessionParams::from_pairs([
            ("hostname", "10.1.1.1"),
            ("user", "admin"),
            ("password", "pw"),
        ]);
        let (result, output) = run(&handler, params, Some(Duration::from_secs(10))).await;

        let report = result.unwrap();
        assert!(output.contains("Connection abandoned."));
        assert_eq!(
            report.events,
            vec![SessionEvent::ConnectionAbandoned {
                program: PathBuf::from(&fake),
                args: vec!["-pw".into(), "pw".into(), "admin@10.1.1.1".into()],
                working_dir: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_script_file_removed_after_session() {
        let handler = ExecHandler::indexed(config(sh_table()));
        let params = SessionParams::from_pairs([("exec", "sh"), ("file", "echo $0")]);
        let (result, output) = run(&handler, params, None).await;

        result.unwrap();
        let path = PathBuf::from(output.trim());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("run"));
        assert!(!path.exists());
    }
}
