//! Job expiry background worker.
//!
//! Runs the expiry sweep on a periodic interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::resources::now_ms;
use crate::state::AppState;

/// Worker that fails jobs whose TTL elapsed.
pub struct ExpiryWorker {
    state: AppState,
    interval: Duration,
}

impl ExpiryWorker {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    /// Run the expiry worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting job expiry worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.state.sweep_expired(now_ms()).await {
                        Ok(0) => {}
                        Ok(count) => info!(expired = count, "Expiry sweep complete"),
                        Err(e) => error!(error = %e, "Expiry sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Job expiry worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
