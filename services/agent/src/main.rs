//! testlib agent
//!
//! Connects to the control plane, queues the jobs it sends, runs them
//! through the automation tool and reports back. A SCAN job runs on a
//! fixed interval so the control plane's inventory stays current.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use testlib_agent::{config, AgentWorker, AnsibleExecutor, ControlLink, WorkerConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting testlib agent");
    info!(
        environment_key = %config.environment_key,
        control_url = %config.control_url,
        commands_path = %config.commands_path.display(),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (link, sender, inbound) = ControlLink::new(config.control_url.clone());
    let link_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { link.run(shutdown_rx).await }
    });

    let executor = Arc::new(AnsibleExecutor::new(
        config.playbook_bin.clone(),
        config.commands_path.clone(),
    ));
    let worker = AgentWorker::new(WorkerConfig::from(&config), executor, sender, inbound);
    let mut worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { worker.run(shutdown_rx).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for tasks to shut down...");
    let shutdown_timeout = Duration::from_secs(5);
    if !worker_handle.is_finished()
        && tokio::time::timeout(shutdown_timeout, worker_handle).await.is_err()
    {
        warn!("Worker did not stop in time");
    }
    if tokio::time::timeout(shutdown_timeout, link_handle).await.is_err() {
        warn!("Link did not stop in time");
    }

    info!("Agent shutdown complete");
    Ok(())
}
