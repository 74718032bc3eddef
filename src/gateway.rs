//! Wiring: configuration in, registered backends and a session manager out.

use std::path::Path;
use std::sync::Arc;
use webterm_exec::{
    CommandTable, CredentialRetry, ExecConfig, ExecHandler, InvocationOptions, SearchPaths,
    LOGS_DIR_CANDIDATES, MIBS_DIR_CANDIDATES,
};
use webterm_handlers::{BackendRegistry, CaptureConfig};
use webterm_ssh::{SshAlgorithms, SshConfig, SshExecHandler, SshShellHandler};
use webterm_telnet::{TelnetConfig, TelnetHandler};

use crate::config::{Config, ExecSection, DEFAULT_LOGS_DIR};
use crate::error::Result;
use crate::server;
use crate::session::{ReplayHandler, SessionManager};

/// The working directory, the gateway's folder and any configured roots.
fn search_paths(exec: &ExecSection) -> SearchPaths {
    let mut search = SearchPaths::standard();
    for dir in &exec.search_dirs {
        search = search.with_root(dir.clone());
    }
    search
}

/// Fill in the MIB directory when unset, and move the capture directory to
/// an existing `logs` folder when it was left at its default.
pub fn locate_directories(config: &mut Config, search: &SearchPaths) {
    if config.exec.mibs_dir.is_none() {
        match search.look_dir(MIBS_DIR_CANDIDATES) {
            Some(dir) => {
                info!("'mibs' directory is '{}'", dir.display());
                config.exec.mibs_dir = Some(dir);
            }
            None => debug!("No 'mibs' directory found"),
        }
    }

    if config.session.logs_dir == Path::new(DEFAULT_LOGS_DIR) {
        if let Some(dir) = search.look_dir(LOGS_DIR_CANDIDATES) {
            info!("'logs' directory is '{}'", dir.display());
            config.session.logs_dir = dir;
        }
    }
}

/// Build the allow-list: explicit entries first, then discovery.
pub fn build_command_table(exec: &ExecSection) -> CommandTable {
    let mut builder = CommandTable::builder(search_paths(exec));
    for (name, path) in &exec.commands {
        builder = builder.command(name.clone(), path.clone());
    }
    for prefix in &exec.trusted_prefixes {
        builder = builder.trusted_prefix(prefix.clone());
    }
    for name in &exec.discover {
        builder = builder.discover(name, &[name.as_str()]);
    }
    if exec.discover_defaults {
        builder = builder.discover_defaults();
    }
    builder.build()
}

/// Register every backend route against one configuration.
pub fn build_registry(config: &Config, table: CommandTable) -> BackendRegistry {
    let capture = CaptureConfig::new(config.session.logs_dir.clone(), config.session.debug);
    let registry = BackendRegistry::new();

    let ssh = SshConfig {
        connect_timeout_secs: config.session.connect_timeout_secs,
        exec_timeout: config.session.exec_timeout,
        algorithms: SshAlgorithms::new(&config.ssh.ciphers, &config.ssh.key_exchanges),
        capture: capture.clone(),
        ..SshConfig::default()
    };
    registry.register(SshShellHandler::new(ssh.clone()));
    registry.register(SshExecHandler::new(ssh));

    registry.register(TelnetHandler::new(TelnetConfig {
        connect_timeout_secs: config.session.connect_timeout_secs,
        capture: capture.clone(),
        ..TelnetConfig::default()
    }));

    let exec = Arc::new(ExecConfig {
        shell: config.exec.shell.clone(),
        options: InvocationOptions {
            mibs_dir: config.exec.mibs_dir.clone(),
            ..InvocationOptions::for_host()
        },
        exec_timeout: config.session.exec_timeout,
        plink_timeout: config.session.plink_timeout,
        capture,
        ..ExecConfig::new(Arc::new(table))
    });
    registry.register(ExecHandler::indexed(Arc::clone(&exec)));
    registry.register(ExecHandler::command_line(Arc::clone(&exec)));
    registry.register(ExecHandler::plink(exec));

    registry.register(ReplayHandler::new(config.session.logs_dir.clone()));
    debug!("{} backend routes registered", registry.count());
    registry
}

/// A configured gateway, ready to serve.
pub struct Gateway {
    config: Config,
    manager: Arc<SessionManager>,
}

impl Gateway {
    /// Discover unset directories and the allow-list, then wire the backends.
    pub fn from_config(mut config: Config) -> Self {
        let search = search_paths(&config.exec);
        locate_directories(&mut config, &search);
        let table = build_command_table(&config.exec);
        Self::with_table(config, table)
    }

    /// Use a prepared allow-list instead of discovering one.
    pub fn with_table(config: Config, table: CommandTable) -> Self {
        let registry = Arc::new(build_registry(&config, table));
        let retry = CredentialRetry::new(config.session.retry_timeout);
        let manager = Arc::new(SessionManager::new(registry, retry));
        Self { config, manager }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn router(&self) -> axum::Router {
        server::build_router(Arc::clone(&self.manager), self.config.server.static_dir.as_deref())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.config.session.debug {
            std::fs::create_dir_all(&self.config.session.logs_dir)?;
        }
        let listener = server::bind(&self.config.server.listen).await?;
        info!(
            "Listening on {} ({} routes)",
            self.config.server.listen,
            self.manager.routes().len()
        );
        server::serve(listener, self.router(), shutdown).await
    }
}
