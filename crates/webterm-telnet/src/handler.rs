use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use webterm_handlers::{
    connect_tcp_with_timeout, default_charset, send_error_and_abort, BackendHandler,
    CaptureConfig, CharsetTranscoder, FrontendChannel, HandlerError, InputEncoder, Pipeline,
    SessionContext, SessionParams, SessionReport, DEFAULT_CONNECTION_TIMEOUT_SECS,
};

use crate::protocol::{escape_iac, naws_negotiation, TelnetDecoder};
use crate::TelnetError;

const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct TelnetConfig {
    pub default_port: u16,
    pub default_rows: u16,
    pub default_cols: u16,
    pub connect_timeout_secs: u64,
    pub capture: CaptureConfig,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            default_port: 23,
            default_rows: 40,
            default_cols: 80,
            connect_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            capture: CaptureConfig::default(),
        }
    }
}

/// Raw line session over TCP with window-size negotiation.
pub struct TelnetHandler {
    config: TelnetConfig,
}

impl TelnetHandler {
    pub fn new(config: TelnetConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(TelnetConfig::default())
    }

    /// Output: transcode then capture. Input: capture the raw frontend bytes,
    /// then encode into the target charset.
    fn pipelines(
        &self,
        params: &SessionParams,
        hostname: &str,
        charset: &str,
    ) -> Result<(Pipeline, Pipeline), HandlerError> {
        let bad_charset = |e: webterm_handlers::PipelineError| HandlerError::InvalidParameter(e.to_string());
        let mut output = Pipeline::new().with_stage(CharsetTranscoder::new(charset).map_err(bad_charset)?);
        let encoder = InputEncoder::new(charset).map_err(bad_charset)?;

        let (out_tee, in_tee) = self.config.capture.open_pair(params, hostname, "telnet");
        if let Some(tee) = out_tee {
            output.push(tee);
        }
        let mut input = Pipeline::new();
        if let Some(tee) = in_tee {
            input.push(tee);
        }
        input.push(encoder);
        Ok((output, input))
    }
}

/// Announce NAWS and report the initial size.
async fn negotiate(writer: &mut OwnedWriteHalf, rows: u16, cols: u16) -> crate::Result<()> {
    writer
        .write_all(&naws_negotiation(rows, cols))
        .await
        .map_err(TelnetError::NegotiationFailed)?;
    debug!("Telnet: sent NAWS {}x{}", cols, rows);
    Ok(())
}

#[async_trait]
impl BackendHandler for TelnetHandler {
    fn name(&self) -> &str {
        "telnet"
    }

    async fn connect(
        &self,
        ctx: &mut SessionContext,
        frontend: &mut FrontendChannel,
    ) -> webterm_handlers::Result<SessionReport> {
        let hostname = match ctx.params.require("hostname") {
            Ok(h) => h.to_string(),
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let port: u16 = ctx.params.parse_or("port", self.config.default_port);
        let charset = ctx
            .params
            .get_non_empty("charset")
            .unwrap_or(default_charset())
            .to_string();
        let rows: u16 = ctx.params.parse_or("rows", self.config.default_rows);
        let cols: u16 = ctx.params.parse_or("columns", self.config.default_cols);

        let (mut output, mut input) = match self.pipelines(&ctx.params, &hostname, &charset) {
            Ok(p) => p,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };

        info!("Telnet: connecting to {}:{} (charset {})", hostname, port, charset);
        let stream = match connect_tcp_with_timeout((hostname.as_str(), port), self.config.connect_timeout_secs).await {
            Ok(s) => s,
            Err(e) => return Err(send_error_and_abort(frontend.sender(), e).await),
        };
        let (mut read_half, mut write_half) = stream.into_split();

        if let Err(e) = negotiate(&mut write_half, rows, cols).await {
            return Err(send_error_and_abort(frontend.sender(), e.into()).await);
        }
        info!("Telnet: connected to {}:{}", hostname, port);

        let mut decoder = TelnetDecoder::new(rows, cols);
        let mut report = SessionReport::default();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let result: webterm_handlers::Result<()> = loop {
            tokio::select! {
                read = read_half.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            info!("Telnet: connection closed by {}", hostname);
                            break Ok(());
                        }
                        Ok(n) => n,
                        Err(e) => {
                            warn!("Telnet: read error: {}", e);
                            break Ok(());
                        }
                    };
                    trace!("Telnet: {} bytes from server", n);
                    let decoded = decoder.decode(&buf[..n]);
                    if !decoded.reply.is_empty() {
                        match ctx.timer.within(write_half.write_all(&decoded.reply)).await {
                            Some(Ok(())) => {}
                            Some(Err(e)) => {
                                warn!("Telnet: negotiation reply failed: {}", e);
                                break Ok(());
                            }
                            None => {
                                report.timed_out = true;
                                break Ok(());
                            }
                        }
                    }
                    let out = match output.process(decoded.data) {
                        Ok(out) => out,
                        Err(e) => {
                            frontend.diagnostic(&format!("copy of stdout failed: {}", e)).await;
                            break Err(e.into());
                        }
                    };
                    match ctx.timer.within(frontend.send(out)).await {
                        Some(Ok(())) => {}
                        Some(Err(_)) => {
                            debug!("Telnet: client gone");
                            break Ok(());
                        }
                        None => {
                            report.timed_out = true;
                            break Ok(());
                        }
                    }
                }

                data = frontend.recv() => {
                    let Some(data) = data else {
                        info!("Telnet: client disconnected");
                        break Ok(());
                    };
                    let encoded = match input.process(data) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!("Telnet: copy of stdin failed: {}", e);
                            break Err(e.into());
                        }
                    };
                    match ctx.timer.within(write_half.write_all(&escape_iac(encoded))).await {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            warn!("Telnet: copy of stdin failed: {}", e);
                            break Ok(());
                        }
                        None => {
                            report.timed_out = true;
                            break Ok(());
                        }
                    }
                }

                _ = ctx.timer.expired() => {
                    report.timed_out = true;
                    break Ok(());
                }
            }
        };

        if report.timed_out {
            warn!("Telnet: session deadline reached");
            frontend.try_diagnostic("session timed out");
        }
        if let Err(e) = write_half.shutdown().await {
            trace!("Telnet: shutdown: {}", e);
        }
        let _ = output.finish();
        let _ = input.finish();

        result.map(|()| report)
    }
}
