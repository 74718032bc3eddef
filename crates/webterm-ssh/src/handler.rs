use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use russh::client;
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use russh_keys::key;
use std::sync::Arc;
use std::time::Duration;
use webterm_handlers::{
    command_alias, send_error_and_abort, BackendHandler, CaptureConfig, CharsetTranscoder,
    DebugTee, FrontendChannel, HandlerError, Pipeline, SessionContext, SessionParams,
    SessionReport, SessionTimer, CANONICAL_CHARSET, DEFAULT_CONNECTION_TIMEOUT_SECS,
};
use zeroize::Zeroizing;

use crate::algorithms::SshAlgorithms;
use crate::auth::InteractiveAuthRelay;
use crate::SshError;

/// Settings shared by both SSH backends.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub default_port: u16,
    pub default_rows: u32,
    pub default_cols: u32,
    pub terminal_type: String,
    pub connect_timeout_secs: u64,
    /// Deadline for single commands when the request sets none.
    pub exec_timeout: Duration,
    pub algorithms: SshAlgorithms,
    pub capture: CaptureConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_port: 22,
            default_rows: 80,
            default_cols: 120,
            terminal_type: "xterm".to_string(),
            connect_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            exec_timeout: Duration::from_secs(10 * 60),
            algorithms: SshAlgorithms::default(),
            capture: CaptureConfig::default(),
        }
    }
}

/// Connection target parsed from the request.
struct SshTarget {
    hostname: String,
    port: u16,
    user: String,
    password: Zeroizing<String>,
}

impl SshTarget {
    fn from_params(params: &SessionParams, default_port: u16) -> Result<Self, HandlerError> {
        Ok(Self {
            hostname: params.require("hostname")?.to_string(),
            port: params.parse_or("port", default_port),
            user: params.get("user").unwrap_or_default().to_string(),
            password: Zeroizing::new(params.get("password").unwrap_or_default().to_string()),
        })
    }
}

async fn dial(config: &SshConfig, target: &SshTarget) -> crate::Result<client::Handle<SshClientHandler>> {
    info!(
        "SSH: connecting to {}@{}:{} (timeout: {}s)",
        target.user, target.hostname, target.port, config.connect_timeout_secs
    );

    let ssh_config = client::Config {
        preferred: config.algorithms.preferred(),
        ..Default::default()
    };

    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
    tokio::time::timeout(
        connect_timeout,
        client::connect(
            Arc::new(ssh_config),
            (target.hostname.as_str(), target.port),
            SshClientHandler::new(&target.hostname, target.port),
        ),
    )
    .await
    .map_err(|_| {
        SshError::ConnectionFailed(format!(
            "connection timed out after {} seconds",
            config.connect_timeout_secs
        ))
    })?
    .map_err(|e| SshError::ConnectionFailed(e.to_string()))
}

/// Dial, authenticate and open a session channel.
///
/// Every failure here is a setup failure: the caller reports it as one line.
async fn open_channel(
    config: &SshConfig,
    target: &SshTarget,
    frontend: &mut FrontendChannel,
) -> Result<(client::Handle<SshClientHandler>, Channel<client::Msg>), HandlerError> {
    let mut session = dial(config, target).await?;

    debug!("SSH: connected to {}, authenticating", target.hostname);

    let mut authenticated = false;
    if !target.password.is_empty() {
        authenticated = session
            .authenticate_password(target.user.as_str(), target.password.as_str())
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
    }
    if !authenticated {
        debug!("SSH: falling back to keyboard-interactive");
        let mut relay = InteractiveAuthRelay::new(target.password.as_str());
        authenticated = relay.run(&mut session, &target.user, frontend).await?;
    }
    if !authenticated {
        return Err(HandlerError::AuthenticationFailed(
            "unable to authenticate".to_string(),
        ));
    }
    info!("SSH: authenticated as {} on {}", target.user, target.hostname);

    let channel = session
        .channel_open_session()
        .await
        .map_err(|e| HandlerError::SetupFailed(format!("failed to create session: {}", e)))?;

    Ok((session, channel))
}

/// Output pipeline for SSH: optional transcoding, then capture.
fn output_pipeline(
    params: &SessionParams,
    tee: Option<DebugTee>,
) -> Result<Pipeline, HandlerError> {
    let charset = params.get_non_empty("charset").unwrap_or(CANONICAL_CHARSET);
    let mut pipeline = Pipeline::new().with_stage(
        CharsetTranscoder::new(charset)
            .map_err(|e| HandlerError::InvalidParameter(e.to_string()))?,
    );
    if let Some(tee) = tee {
        pipeline.push(tee);
    }
    Ok(pipeline)
}

/// Why a relay loop ended.
enum RelayEnd {
    /// Remote side closed the channel.
    Remote,
    /// Browser went away.
    Frontend,
    /// Session deadline fired.
    Timeout,
}

/// Relay channel output to the frontend and frontend input to the channel
/// until either side ends or the deadline fires.
async fn relay(
    channel: &mut Channel<client::Msg>,
    ctx: &mut SessionContext,
    frontend: &mut FrontendChannel,
    output: &mut Pipeline,
    mut input_tee: Option<DebugTee>,
    report: &mut SessionReport,
) -> Result<RelayEnd, HandlerError> {
    loop {
        tokio::select! {
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        trace!("SSH: {} bytes from server", data.len());
                        let out = output.process(Bytes::copy_from_slice(data))?;
                        match ctx.timer.within(frontend.send(out)).await {
                            Some(Ok(())) => {}
                            Some(Err(_)) => return Ok(RelayEnd::Frontend),
                            None => return Ok(deadline_reached(report)),
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!("SSH: remote exit status {}", exit_status);
                        report.exit_status = Some(exit_status as i32);
                    }
                    Some(ChannelMsg::Eof) => {
                        debug!("SSH: channel EOF");
                    }
                    Some(ChannelMsg::Close) | None => return Ok(RelayEnd::Remote),
                    Some(other) => trace!("SSH: ignoring {:?}", other),
                }
            }

            input = frontend.recv() => {
                let Some(data) = input else {
                    info!("SSH: client disconnected");
                    return Ok(RelayEnd::Frontend);
                };
                if let Some(tee) = input_tee.as_mut() {
                    tee.record(&data);
                }
                match ctx.timer.within(channel.data(&data[..])).await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        warn!("SSH: write to channel failed: {}", e);
                        return Ok(RelayEnd::Remote);
                    }
                    None => return Ok(deadline_reached(report)),
                }
            }

            _ = ctx.timer.expired() => return Ok(deadline_reached(report)),
        }
    }
}

fn deadline_reached(report: &mut SessionReport) -> RelayEnd {
    warn!("SSH: session deadline reached, closing channel");
    report.timed_out = true;
    RelayEnd::Timeout
}

/// Report for a deadline that passed before the channel was open.
fn setup_deadline(frontend: &FrontendChannel, message: &str) -> SessionReport {
    warn!("SSH: session deadline reached during setup");
    frontend.try_diagnostic(message);
    SessionReport {
        timed_out: true,
        ..SessionReport::default()
    }
}

/// Message written when an exec deadline kills the command.
fn killed_message(timer: &SessionTimer) -> String {
    let limit = timer
        .duration()
        .map(|d| format!(" after {:?}", d))
        .unwrap_or_default();
    format!("Process killed{}", limit)
}

async fn teardown(session: &client::Handle<SshClientHandler>, channel: &Channel<client::Msg>) {
    if let Err(e) = channel.close().await {
        trace!("SSH: channel close: {}", e);
    }
    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "session closed", "en")
        .await
    {
        trace!("SSH: disconnect: {}", e);
    }
}

/// Interactive remote shell with a pseudo-terminal.
pub struct SshShellHandler {
    config: SshConfig,
}

impl SshShellHandler {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SshConfig::default())
    }
}

#[async_trait]
impl BackendHandler for SshShellHandler {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> webterm_handlers::Result<SessionReport> {
        let target = match SshTarget::from_params(&ctx.params, self.config.default_port) {
            Ok(t) => t,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let rows: u32 = ctx.params.parse_or("rows", self.config.default_rows);
        let cols: u32 = ctx.params.parse_or("columns", self.config.default_cols);

        let (session, mut channel) = match ctx.timer.within(open_channel(&self.config, &target, frontend)).await {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => return Err(send_error_and_abort(frontend.sender(), e).await),
            None => return Ok(setup_deadline(frontend, "session timed out")),
        };

        let modes = [
            (Pty::ECHO, 1),
            (Pty::TTY_OP_ISPEED, 14400),
            (Pty::TTY_OP_OSPEED, 14400),
        ];
        if let Err(e) = channel
            .request_pty(false, &self.config.terminal_type, cols, rows, 0, 0, &modes)
            .await
        {
            let err = HandlerError::SetupFailed(format!("request for pseudo terminal failed: {}", e));
            return Err(send_error_and_abort(frontend.sender(), err).await);
        }
        if let Err(e) = channel.request_shell(false).await {
            let err = HandlerError::SetupFailed(format!("unable to start shell: {}", e));
            return Err(send_error_and_abort(frontend.sender(), err).await);
        }
        info!("SSH: shell started on {} ({}x{})", target.hostname, cols, rows);

        let (out_tee, in_tee) = self.config.capture.open_pair(&ctx.params, &target.hostname, "ssh");
        let mut output = match output_pipeline(&ctx.params, out_tee) {
            Ok(p) => p,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };

        let mut report = SessionReport::default();
        let result = relay(&mut channel, ctx, frontend, &mut output, in_tee, &mut report).await;
        teardown(&session, &channel).await;
        let _ = output.finish();

        match result {
            Ok(RelayEnd::Timeout) => {
                frontend.try_diagnostic("session timed out");
                Ok(report)
            }
            Ok(_) => Ok(report),
            Err(e) => {
                error!("SSH: relay failed: {}", e);
                frontend.diagnostic(&format!("copy of stdout failed: {}", e)).await;
                Err(e)
            }
        }
    }
}

/// One remote command, no pseudo-terminal.
pub struct SshExecHandler {
    config: SshConfig,
}

impl SshExecHandler {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SshConfig::default())
    }
}

#[async_trait]
impl BackendHandler for SshExecHandler {
    fn name(&self) -> &str {
        "ssh_exec"
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.config.exec_timeout)
    }

    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> webterm_handlers::Result<SessionReport> {
        let target = match SshTarget::from_params(&ctx.params, self.config.default_port) {
            Ok(t) => t,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let command = match ctx.params.require("cmd") {
            Ok(c) => c.to_string(),
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let alias = command_alias(&command, ctx.params.get("dump_file"));

        let (session, mut channel) = match ctx.timer.within(open_channel(&self.config, &target, frontend)).await {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => return Err(send_error_and_abort(frontend.sender(), e).await),
            None => return Ok(setup_deadline(frontend, &killed_message(&ctx.timer))),
        };

        let capture_name = format!("{}_{}", target.hostname, alias);
        let (out_tee, in_tee) = self.config.capture.open_pair(&ctx.params, &capture_name, "ssh");
        let mut output = match output_pipeline(&ctx.params, out_tee) {
            Ok(p) => p,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };

        if let Err(e) = channel.exec(false, command.as_str()).await {
            let err = HandlerError::SetupFailed(format!("unable to execute command: {}", e));
            return Err(send_error_and_abort(frontend.sender(), err).await);
        }
        info!("SSH: executing {:?} on {}", alias, target.hostname);

        let mut report = SessionReport::default();
        let result = relay(&mut channel, ctx, frontend, &mut output, in_tee, &mut report).await;
        teardown(&session, &channel).await;
        let _ = output.finish();

        match result {
            Ok(RelayEnd::Timeout) => {
                frontend.try_diagnostic(&killed_message(&ctx.timer));
                Ok(report)
            }
            Ok(_) => {
                match report.exit_status {
                    Some(status) if status != 0 => {
                        frontend
                            .diagnostic(&format!("Process exited with status {}", status))
                            .await;
                    }
                    _ => debug!("SSH: command {:?} finished", alias),
                }
                Ok(report)
            }
            Err(e) => {
                error!("SSH: relay failed: {}", e);
                frontend.diagnostic(&format!("copy of stdout failed: {}", e)).await;
                Err(e)
            }
        }
    }
}

/// Accepts any host key; targets are reached over trusted management networks.
struct SshClientHandler {
    hostname: String,
    port: u16,
}

impl SshClientHandler {
    fn new(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
        }
    }
}

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "SSH: accepting {} host key for {}:{}",
            server_public_key.name(),
            self.hostname,
            self.port
        );
        Ok(true)
    }
}
