//! Event names and shared event vocabulary.

use serde::{Deserialize, Serialize};

/// Canonical event names.
pub mod event_types {
    // Job lifecycle
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_DONE: &str = "job.done";
    pub const JOB_EXPIRED: &str = "job.expired";

    // Resource changes
    pub const RESOURCE_CREATED: &str = "resource.created";
    pub const RESOURCE_UPDATED: &str = "resource.updated";
    pub const RESOURCE_DELETED: &str = "resource.deleted";
}

/// Anything that can travel over the bus.
pub trait Event {
    /// The name handlers subscribe to.
    fn name(&self) -> &str;
}

/// Kind of change carried by a resource event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    /// Returns the bus event name for this change.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChangeKind::Created => event_types::RESOURCE_CREATED,
            ChangeKind::Updated => event_types::RESOURCE_UPDATED,
            ChangeKind::Deleted => event_types::RESOURCE_DELETED,
        }
    }

    /// Returns the lowercase label used on subscriber channels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
