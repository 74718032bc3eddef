//! webterm - Browser-facing terminal gateway
//!
//! Serves one websocket route per backend (`/ssh`, `/ssh_exec`, `/telnet`,
//! `/cmd`, `/cmd2`, `/plink`, `/replay`) and optionally a static directory.

use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

use webterm_gateway::{config, init_logging, Config, Gateway, Result};

#[derive(Parser)]
#[command(name = "webterm")]
#[command(version)]
#[command(about = "Browser-facing terminal gateway for SSH, telnet and local tools")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen address
    #[arg(long)]
    listen: Option<String>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        error!("{}", e);
        eprintln!("webterm: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_config_from_str("")?,
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
        config.validate().map_err(webterm_gateway::GatewayError::Config)?;
    }

    init_logging(&config.logging.level, cli.verbose)?;
    info!("Starting webterm v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }
    log_summary(&config);

    let gateway = Gateway::from_config(config);
    gateway.serve(shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

fn log_summary(config: &Config) {
    info!(
        "Sessions: connect timeout {}s, exec timeout {}, plink timeout {}",
        config.session.connect_timeout_secs,
        humantime::format_duration(config.session.exec_timeout),
        humantime::format_duration(config.session.plink_timeout)
    );
    if config.session.debug {
        info!("Capturing every session to {}", config.session.logs_dir.display());
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }
}
