use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub environment_key: String,
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    pub expiry_interval: Duration,
    pub resource_batch_interval: Duration,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment_key = lookup("TESTLIB_ENVIRONMENT_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .context("TESTLIB_ENVIRONMENT_KEY must be set")?;
        if environment_key.starts_with('-') {
            bail!("TESTLIB_ENVIRONMENT_KEY must not start with '-': its first segment is the environment prefix");
        }

        let listen_addr = lookup("TESTLIB_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3001".to_string())
            .parse()
            .context("TESTLIB_LISTEN_ADDR is not a socket address")?;

        let db_path = lookup("TESTLIB_DB_PATH")
            .unwrap_or_else(|| "/var/lib/testlib/db.json".to_string())
            .into();

        let expiry_secs: u64 = parse_or(&lookup, "TESTLIB_EXPIRY_INTERVAL_SECS", 5)?;
        let batch_ms: u64 = parse_or(&lookup, "TESTLIB_RESOURCE_BATCH_MS", 1000)?;
        if expiry_secs == 0 || batch_ms == 0 {
            bail!("worker intervals must be greater than zero");
        }

        let log_level = lookup("TESTLIB_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            environment_key,
            listen_addr,
            db_path,
            expiry_interval: Duration::from_secs(expiry_secs),
            resource_batch_interval: Duration::from_millis(batch_ms),
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
