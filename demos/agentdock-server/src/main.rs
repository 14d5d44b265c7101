//! agentdock server.
//!
//! Run with: cargo run -p agentdock-server -- --workspace-dir ./workspace
//!
//! Settings come from an optional TOML file, then command-line flags and
//! environment variables on top.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use agentdock_core::ServerConfig;
use agentdock_executor::CliToolExecutor;
use agentdock_registry::AgentRegistry;
use agentdock_session::{EventHub, RequestChannel, SessionRegistry};
use agentdock_transport::{AppState, Dispatcher, router};
use agentdock_workspace::Provisioner;
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agentdock-server")]
#[command(about = "Session-oriented agent workspace server")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "AGENTDOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "AGENTDOCK_BIND")]
    bind: Option<SocketAddr>,

    /// Root of the agent catalog and workspaces
    #[arg(long, env = "WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// Claude Code executable
    #[arg(long, env = "CLAUDE_CODE_PATH")]
    claude_path: Option<String>,

    /// Gemini CLI executable
    #[arg(long, env = "GEMINI_CLI_PATH")]
    gemini_path: Option<String>,

    /// Tool execution timeout in seconds
    #[arg(long, env = "COMMAND_TIMEOUT")]
    command_timeout: Option<u64>,

    /// Idle session timeout in seconds
    #[arg(long, env = "SESSION_TIMEOUT")]
    session_timeout: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = self.workspace_dir {
            config.workspace_dir = dir;
        }
        if let Some(path) = self.claude_path {
            config.claude_path = path;
        }
        if let Some(path) = self.gemini_path {
            config.gemini_path = path;
        }
        if let Some(secs) = self.command_timeout {
            config.command_timeout_secs = secs;
        }
        if let Some(secs) = self.session_timeout {
            config.session_timeout_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config()?;

    let provisioner = Provisioner::new(config.git_timeout());
    if !provisioner.check_git_installed().await {
        tracing::warn!("git not found on PATH; agent creation will fail");
    }

    let registry = Arc::new(AgentRegistry::new(&config.workspace_dir, provisioner));
    let loaded = registry
        .initialize()
        .await
        .with_context(|| format!("initializing {}", config.workspace_dir.display()))?;
    tracing::info!(agents = loaded, dir = %config.workspace_dir.display(), "Registry ready");

    let events = Arc::new(EventHub::new());
    let sessions = Arc::new(SessionRegistry::new(
        Arc::clone(&events),
        config.session_timeout(),
    ));
    let sweeper = sessions.spawn_sweeper(config.sweep_interval());
    let heartbeat = events.spawn_heartbeat(config.heartbeat_interval());

    let executor = Arc::new(CliToolExecutor::from_config(&config));
    let dispatcher = Dispatcher::new(registry, executor, Arc::clone(&events))
        .with_max_input_bytes(config.max_input_bytes);
    let channel = RequestChannel::new(Arc::clone(&sessions), Arc::new(dispatcher));
    let app = router(AppState::new(Arc::clone(&sessions), channel));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!("Server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions))
        .await?;

    sweeper.abort();
    heartbeat.abort();
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after closing every session, which ends the open
/// event streams so the server can drain.
async fn shutdown_signal(sessions: Arc<SessionRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    let closed = sessions.close_all().await;
    tracing::info!(sessions = closed, "Shutdown requested");
}
