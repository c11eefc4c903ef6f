//! Job types and their typed parameters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ProtoError;

// =============================================================================
// Job Type
// =============================================================================

/// The fixed set of job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Scan,
    ExportAddNvme,
    ExportRmNvme,
    ExportAddNfs,
    ExportRmNfs,
    ExportAddIscsi,
    ExportRmIscsi,
    Fs,
    Test,
    NetdevConf,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [JobType; 10] = [
        JobType::Scan,
        JobType::ExportAddNvme,
        JobType::ExportRmNvme,
        JobType::ExportAddNfs,
        JobType::ExportRmNfs,
        JobType::ExportAddIscsi,
        JobType::ExportRmIscsi,
        JobType::Fs,
        JobType::Test,
        JobType::NetdevConf,
    ];

    /// Returns the wire tag, which is also the per-type event name and the
    /// playbook name on the agent.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scan => "SCAN",
            JobType::ExportAddNvme => "EXPORT_ADD_NVME",
            JobType::ExportRmNvme => "EXPORT_RM_NVME",
            JobType::ExportAddNfs => "EXPORT_ADD_NFS",
            JobType::ExportRmNfs => "EXPORT_RM_NFS",
            JobType::ExportAddIscsi => "EXPORT_ADD_ISCSI",
            JobType::ExportRmIscsi => "EXPORT_RM_ISCSI",
            JobType::Fs => "FS",
            JobType::Test => "TEST",
            JobType::NetdevConf => "NETDEV_CONF",
        }
    }

    /// Resolves a wire tag. Unrecognised tags are a hard error.
    pub fn parse(tag: &str) -> Result<Self, ProtoError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| ProtoError::UnknownJobType(tag.to_string()))
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Parameter payloads
// =============================================================================

/// Parameters naming a host and the target to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachParams {
    pub ip: String,
    pub target: String,
}

/// Parameters naming only a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetParams {
    pub target: String,
}

/// Parameters of an NFS mount or unmount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsParams {
    pub ip: String,
    pub export_path: String,
    pub folder_name: String,
}

/// Type-specific job parameters. The variant determines the job type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobParams {
    Scan,
    ExportAddNvme(AttachParams),
    ExportRmNvme(TargetParams),
    ExportAddNfs(NfsParams),
    ExportRmNfs(NfsParams),
    ExportAddIscsi(AttachParams),
    ExportRmIscsi(TargetParams),
    /// Free-form fields handed to the playbook as-is.
    Fs(Map<String, Value>),
    Test(TargetParams),
    NetdevConf(AttachParams),
}

impl JobParams {
    /// Returns the job type these parameters belong to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Scan => JobType::Scan,
            JobParams::ExportAddNvme(_) => JobType::ExportAddNvme,
            JobParams::ExportRmNvme(_) => JobType::ExportRmNvme,
            JobParams::ExportAddNfs(_) => JobType::ExportAddNfs,
            JobParams::ExportRmNfs(_) => JobType::ExportRmNfs,
            JobParams::ExportAddIscsi(_) => JobType::ExportAddIscsi,
            JobParams::ExportRmIscsi(_) => JobType::ExportRmIscsi,
            JobParams::Fs(_) => JobType::Fs,
            JobParams::Test(_) => JobType::Test,
            JobParams::NetdevConf(_) => JobType::NetdevConf,
        }
    }

    /// Decodes the params object of a job whose type is already known.
    pub fn decode(job_type: JobType, params: Value) -> Result<Self, ProtoError> {
        let decoded = match job_type {
            JobType::Scan => Ok(JobParams::Scan),
            JobType::Fs => match params {
                Value::Null => Ok(JobParams::Fs(Map::new())),
                other => serde_json::from_value(other).map(JobParams::Fs),
            },
            JobType::ExportAddNvme => serde_json::from_value(params).map(JobParams::ExportAddNvme),
            JobType::ExportRmNvme => serde_json::from_value(params).map(JobParams::ExportRmNvme),
            JobType::ExportAddNfs => serde_json::from_value(params).map(JobParams::ExportAddNfs),
            JobType::ExportRmNfs => serde_json::from_value(params).map(JobParams::ExportRmNfs),
            JobType::ExportAddIscsi => {
                serde_json::from_value(params).map(JobParams::ExportAddIscsi)
            }
            JobType::ExportRmIscsi => serde_json::from_value(params).map(JobParams::ExportRmIscsi),
            JobType::Test => serde_json::from_value(params).map(JobParams::Test),
            JobType::NetdevConf => serde_json::from_value(params).map(JobParams::NetdevConf),
        };

        decoded.map_err(|source| ProtoError::InvalidParams {
            job_type: job_type.as_str(),
            source,
        })
    }

    /// Renders the params object as sent on the wire and to the executor.
    pub fn to_value(&self) -> Value {
        match self {
            JobParams::Scan => json!({}),
            JobParams::Fs(fields) => Value::Object(fields.clone()),
            JobParams::ExportAddNvme(p) | JobParams::ExportAddIscsi(p) | JobParams::NetdevConf(p) => {
                json!({ "ip": p.ip, "target": p.target })
            }
            JobParams::ExportRmNvme(p) | JobParams::ExportRmIscsi(p) | JobParams::Test(p) => {
                json!({ "target": p.target })
            }
            JobParams::ExportAddNfs(p) | JobParams::ExportRmNfs(p) => json!({
                "ip": p.ip,
                "export_path": p.export_path,
                "folder_name": p.folder_name,
            }),
        }
    }
}
