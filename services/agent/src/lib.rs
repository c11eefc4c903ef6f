//! testlib agent library.
//!
//! The agent runs next to the hardware under test. It receives jobs from the
//! control plane, runs them one target at a time through the automation tool
//! and reports each job back as it progresses.

pub mod client;
pub mod config;
pub mod executor;
pub mod scheduler;
pub mod worker;

pub use client::{ControlLink, LinkSender};
pub use executor::{AnsibleExecutor, Executor, MockExecutor};
pub use worker::{AgentWorker, WorkerConfig};

impl From<&config::Config> for WorkerConfig {
    fn from(config: &config::Config) -> Self {
        Self {
            environment_key: config.environment_key.clone(),
            run_interval: config.run_interval,
            scan_interval: config.scan_interval,
        }
    }
}
