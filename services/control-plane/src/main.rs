//! testlib control plane
//!
//! Owns the resource inventory and the job lifecycle. Dispatches jobs to
//! agents over websockets and reconciles their scan results.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use testlib_control_plane::{
    api, build_bus, config,
    db::Store,
    gateway::{AgentHub, FeedWorker, ResourceFeed},
    jobs::ExpiryWorker,
    resources::ResourceRepository,
    AppState, Domain,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to TESTLIB_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting testlib control plane");
    info!(
        listen_addr = %config.listen_addr,
        environment_key = %config.environment_key,
        db_path = %config.db_path.display(),
        "Configuration loaded"
    );

    let store = Arc::new(Store::open(&config.db_path).context("failed to open store")?);
    let resources =
        ResourceRepository::load(store.clone()).context("failed to load resources")?;

    let agents = AgentHub::default();
    let feed = ResourceFeed::default();
    let domain = Domain::new(
        config.environment_key.clone(),
        resources,
        store,
        agents,
        feed.clone(),
    );
    let state = AppState::new(domain, build_bus());
    let shutdown_rx = state.shutdown_signal();

    let expiry_worker = ExpiryWorker::new(state.clone(), config.expiry_interval);
    let expiry_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            expiry_worker.run(shutdown_rx).await;
        }
    });

    let feed_worker = FeedWorker::new(feed, config.resource_batch_interval);
    let feed_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            feed_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                    info!("HTTP server shutting down");
                })
                .await
        }
    });

    let mut fatal_rx = shutdown_rx.clone();
    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        _ = fatal_rx.wait_for(|stop| *stop) => {
            error!("Stopping after a fatal persistence error");
            true
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            false
        }
    };

    // Signal shutdown to all workers
    state.request_shutdown();

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, expiry_handle).await {
        warn!(error = %e, "Expiry worker did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, feed_handle).await {
        warn!(error = %e, "Resource feed worker did not shut down in time");
    }

    if fatal {
        bail!("control plane stopped: durable store can no longer persist writes");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
