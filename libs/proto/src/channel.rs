//! Agent channel frames.
//!
//! Frames are JSON text messages of the form `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};

use crate::{Job, JobWire, ProtoError};

/// Path of the agent channel on the control plane.
pub const AGENT_CHANNEL_PATH: &str = "/agent";

/// Path of the resource notification channel on the control plane.
pub const RESOURCES_CHANNEL_PATH: &str = "/resources";

/// Messages exchanged on the agent channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum AgentFrame {
    /// control → agent: newly created jobs.
    #[serde(rename = "job:new")]
    JobNew(Vec<JobWire>),

    /// agent → control: a job whose status or result changed.
    #[serde(rename = "job:save")]
    JobSave(JobWire),
}

impl AgentFrame {
    pub fn job_new<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        AgentFrame::JobNew(jobs.into_iter().map(JobWire::from).collect())
    }

    pub fn job_save(job: &Job) -> Self {
        AgentFrame::JobSave(JobWire::from(job))
    }

    /// Returns the event name of this frame.
    pub fn event(&self) -> &'static str {
        match self {
            AgentFrame::JobNew(_) => "job:new",
            AgentFrame::JobSave(_) => "job:save",
        }
    }

    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}
