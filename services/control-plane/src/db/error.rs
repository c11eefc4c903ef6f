//! Durable store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Durable store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The namespace is not one of the store's namespaces. A programmer error.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// The store file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store directory could not be created.
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every attempt to write the primary file failed. The in-memory state is
    /// no longer durable and the process should halt.
    #[error("failed to write {path} after {attempts} attempts: {source}")]
    WriteExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the process can no longer guarantee durability.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::WriteExhausted { .. })
    }
}
