//! Protocol errors.

use testlib_id::IdError;
use thiserror::Error;

/// Errors raised while decoding wire data.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The job type tag is not one this system knows.
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// The params object does not match the job type.
    #[error("invalid params for {job_type}: {source}")]
    InvalidParams {
        job_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The frame or document is not valid JSON for its schema.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An identifier failed validation.
    #[error("invalid identifier: {0}")]
    Id(#[from] IdError),
}
