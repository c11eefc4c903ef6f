//! Configuration for the agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use testlib_proto::AGENT_CHANNEL_PATH;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment this agent serves; jobs for any other are ignored.
    pub environment_key: String,

    /// Agent channel URL on the control plane.
    pub control_url: String,

    /// Directory holding `inventory.yml` and one playbook per job type.
    pub commands_path: PathBuf,

    /// Automation tool binary.
    pub playbook_bin: String,

    /// How often queued jobs are picked.
    pub run_interval: Duration,

    /// How often a SCAN job is run.
    pub scan_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment_key = lookup("TESTLIB_ENVIRONMENT_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .context("TESTLIB_ENVIRONMENT_KEY must be set")?;

        let control_url = match lookup("TESTLIB_CONTROL_URL").filter(|v| !v.is_empty()) {
            Some(url) => url,
            None => {
                let host =
                    lookup("TESTLIB_CONTROL_HOST").unwrap_or_else(|| "localhost".to_string());
                let port = lookup("TESTLIB_CONTROL_PORT").unwrap_or_else(|| "3001".to_string());
                port.parse::<u16>()
                    .context("TESTLIB_CONTROL_PORT is not a port number")?;
                format!("ws://{host}:{port}{AGENT_CHANNEL_PATH}")
            }
        };

        let commands_path = lookup("TESTLIB_COMMANDS_PATH")
            .unwrap_or_else(|| "/opt/testlib/jobs".to_string())
            .into();

        let playbook_bin =
            lookup("TESTLIB_PLAYBOOK_BIN").unwrap_or_else(|| "ansible-playbook".to_string());

        let run_ms = parse_or(&lookup, "TESTLIB_RUN_INTERVAL_MS", 1000)?;
        let scan_secs = parse_or(&lookup, "TESTLIB_SCAN_INTERVAL_SECS", 17)?;
        if run_ms == 0 || scan_secs == 0 {
            bail!("agent intervals must be greater than zero");
        }

        let log_level = lookup("TESTLIB_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            environment_key,
            control_url,
            commands_path,
            playbook_bin,
            run_interval: Duration::from_millis(run_ms),
            scan_interval: Duration::from_secs(scan_secs),
            log_level,
        })
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<u64> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer")),
        None => Ok(default),
    }
}
