//! Application state shared across request handlers and workers.

use std::sync::Arc;

use testlib_proto::{Job, JobWire};
use tokio::sync::{watch, Mutex};
use tracing::error;

use crate::domain::Domain;
use crate::error::ControlError;
use crate::gateway::{AgentHub, ResourceFeed};
use crate::jobs::{Acceptance, JobRequest, JobService};
use crate::reactors::ControlBus;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor. The
/// domain sits behind one async mutex: every operation on it runs to
/// completion, events included, before the next one starts.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    domain: Mutex<Domain>,
    bus: ControlBus,
    agents: AgentHub,
    feed: ResourceFeed,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(domain: Domain, bus: ControlBus) -> Self {
        let agents = domain.agents.clone();
        let feed = domain.feed.clone();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(AppStateInner {
                domain: Mutex::new(domain),
                bus,
                agents,
                feed,
                shutdown,
            }),
        }
    }

    pub fn agents(&self) -> &AgentHub {
        &self.inner.agents
    }

    pub fn feed(&self) -> &ResourceFeed {
        &self.inner.feed
    }

    /// Receiver flipped to `true` when the process must stop.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Asks every worker and the server to stop.
    pub fn request_shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Creates a job and dispatches it.
    pub async fn submit_job(&self, request: JobRequest) -> Result<Job, ControlError> {
        let result = {
            let mut domain = self.inner.domain.lock().await;
            JobService::submit(&mut domain, &self.inner.bus, request)
        };
        self.check_fatal(result)
    }

    /// Handles a job sent back by an agent.
    pub async fn job_returned(&self, wire: JobWire) -> Result<Acceptance, ControlError> {
        let result = {
            let mut domain = self.inner.domain.lock().await;
            JobService::accept_returned(&mut domain, &self.inner.bus, wire)
        };
        self.check_fatal(result)
    }

    /// Fails expired jobs.
    pub async fn sweep_expired(&self, now_ms: i64) -> Result<usize, ControlError> {
        let result = {
            let mut domain = self.inner.domain.lock().await;
            JobService::sweep_expired(&mut domain, &self.inner.bus, now_ms)
        };
        self.check_fatal(result)
    }

    /// Runs `f` with exclusive access to the domain.
    pub async fn with_domain<T>(&self, f: impl FnOnce(&mut Domain) -> T) -> T {
        let mut domain = self.inner.domain.lock().await;
        f(&mut domain)
    }

    fn check_fatal<T>(&self, result: Result<T, ControlError>) -> Result<T, ControlError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(error = %e, "Durable store lost a write; shutting down");
                self.request_shutdown();
            }
        }
        result
    }
}
