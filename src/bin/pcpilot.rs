//! pcpilot agent binary.
//!
//! Usage: `pcpilot [CONFIG]`. Without an argument the default config path is
//! used, and a missing file falls back to built-in defaults.
//!
//! The development build talks to the operator over stdin/stdout, so all
//! tracing output goes to stderr and to a daily log file.

use anyhow::Context;
use pcpilot::channels::{MessagingGateway, StdioGateway};
use pcpilot::jobs::TokioJobQueue;
use pcpilot::store::StateStore;
use pcpilot::{Agent, AgentConfig, AgentError, pilot_dirs, platform};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Inbound event queue depth between the gateway and the agent.
const INBOUND_CAPACITY: usize = 64;

fn setup_logging() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let logs_dir = pilot_dirs::logs_dir();
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("cannot create {}", logs_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "pcpilot.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(guard)
}

fn load_config() -> anyhow::Result<AgentConfig> {
    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let path = explicit
        .clone()
        .unwrap_or_else(AgentConfig::default_config_path);

    let config = match AgentConfig::from_file(&path) {
        Ok(config) => config,
        Err(AgentError::Io(e)) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("no config at {}, using defaults", path.display());
            AgentConfig::default()
        }
        Err(e) => return Err(e).with_context(|| format!("cannot load {}", path.display())),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = setup_logging()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pcpilot starting");

    let config = load_config()?;
    let Some(session) = config.authorized_session() else {
        anyhow::bail!("authorized_session is not set; refusing to start");
    };

    let store = StateStore::new(config.state_path());
    tracing::info!(state = %config.state_path().display(), %session, "configuration loaded");

    let gateway = Arc::new(StdioGateway::new(session));
    let (jobs, fired_rx) = TokioJobQueue::new();
    let mut agent = Agent::new(
        config,
        gateway.clone(),
        platform::create_facility(),
        Box::new(jobs),
        store,
    );
    if agent.restore() {
        tracing::info!("battery monitoring resumed");
    }

    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let gateway_task = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.run(inbound_tx).await })
    };
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                cancel.cancel();
            }
        })
    };

    agent.run(inbound_rx, fired_rx, cancel.child_token()).await;
    ctrl_c.abort();
    gateway_task.abort();

    match gateway_task.await {
        Ok(Err(e)) => {
            let e = AgentError::Channel(format!("{e:#}"));
            tracing::error!(error = %e, "gateway exited with error");
            return Err(e.into());
        }
        Ok(Ok(())) | Err(_) => {}
    }

    tracing::info!("pcpilot shut down cleanly");
    Ok(())
}
