//! The job record and its lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use testlib_id::{JobId, ResourceId};

use crate::{JobParams, JobType, ProtoError};

/// Default time-to-live of a job.
pub const DEFAULT_JOB_TTL_MS: i64 = 60_000;

/// Error codes recorded in job results.
pub mod error_codes {
    /// The job outlived its TTL on the control plane.
    pub const JOB_EXPIRED: &str = "JobExpired";
    /// The executor's output could not be parsed.
    pub const PARSE_ERROR: &str = "ParseError";
    /// The executor wrote to stderr or failed unexpectedly.
    pub const UNKNOWN_ERROR: &str = "UnknownError";
    /// The executor could not be started.
    pub const EXECUTION_ERROR: &str = "ExecutionError";
}

// =============================================================================
// Status and result
// =============================================================================

/// Job lifecycle status. `Ok` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    New,
    Processing,
    Ok,
    Failed,
}

impl JobStatus {
    /// Returns true for `Ok` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ok | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::New => "NEW",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Ok => "OK",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One error entry of a job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    #[serde(rename = "error")]
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Structured outcome reported by the executor.
///
/// `resources` holds the inventory of SCAN jobs; other job types may report
/// additional fields, which are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub environment_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default)]
    pub errors: Vec<JobError>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// Job
// =============================================================================

/// A unit of work dispatched to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JobWire", into = "JobWire")]
pub struct Job {
    pub id: JobId,
    pub environment_key: String,
    pub status: JobStatus,
    /// Creation time, epoch milliseconds.
    pub created: i64,
    pub ttl: i64,
    pub params: JobParams,
    pub targets: Option<Vec<ResourceId>>,
    pub result: JobResult,
}

impl Job {
    /// Creates a NEW job whose id is derived from its type and `created_ms`.
    pub fn new(environment_key: impl Into<String>, params: JobParams, created_ms: i64) -> Self {
        Self {
            id: JobId::new(params.job_type().as_str(), created_ms),
            environment_key: environment_key.into(),
            status: JobStatus::New,
            created: created_ms,
            ttl: DEFAULT_JOB_TTL_MS,
            params,
            targets: None,
            result: JobResult::default(),
        }
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Vec<ResourceId>) -> Self {
        self.targets = Some(targets);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: i64) -> Self {
        self.ttl = ttl_ms;
        self
    }

    pub fn job_type(&self) -> JobType {
        self.params.job_type()
    }

    /// Target resource ids, empty when the job has none.
    pub fn targets(&self) -> &[ResourceId] {
        self.targets.as_deref().unwrap_or(&[])
    }

    /// True once the job reached `Ok` or `Failed`.
    pub fn done(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the TTL elapsed and the job is not done.
    pub fn expired(&self, now_ms: i64) -> bool {
        !self.done() && now_ms > self.created.saturating_add(self.ttl)
    }

    pub fn is_ok(&self) -> bool {
        self.status == JobStatus::Ok
    }

    pub fn push_error(&mut self, code: &str, message: impl Into<String>) {
        self.result.errors.push(JobError::new(code, message));
    }

    /// Joined error messages, for logging.
    pub fn error_summary(&self) -> String {
        self.result
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// =============================================================================
// Wire form
// =============================================================================

/// A job as it travels between processes, with the type tag still unchecked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWire {
    pub id: String,
    pub environment_key: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub status: JobStatus,
    pub created: i64,
    #[serde(default = "default_ttl")]
    pub ttl: i64,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tgt: Option<Vec<ResourceId>>,
    #[serde(default)]
    pub result: JobResult,
}

fn default_ttl() -> i64 {
    DEFAULT_JOB_TTL_MS
}

impl From<Job> for JobWire {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            environment_key: job.environment_key,
            job_type: job.params.job_type().as_str().to_string(),
            status: job.status,
            created: job.created,
            ttl: job.ttl,
            params: job.params.to_value(),
            tgt: job.targets,
            result: job.result,
        }
    }
}

impl From<&Job> for JobWire {
    fn from(job: &Job) -> Self {
        job.clone().into()
    }
}

impl TryFrom<JobWire> for Job {
    type Error = ProtoError;

    fn try_from(wire: JobWire) -> Result<Self, Self::Error> {
        let job_type = JobType::parse(&wire.job_type)?;
        let params = JobParams::decode(job_type, wire.params)?;

        Ok(Self {
            id: JobId::parse(&wire.id)?,
            environment_key: wire.environment_key,
            status: wire.status,
            created: wire.created,
            ttl: wire.ttl,
            params,
            targets: wire.tgt,
            result: wire.result,
        })
    }
}
