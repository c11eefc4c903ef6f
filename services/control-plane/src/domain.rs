//! The mutable domain context shared by every event handler.
//!
//! `Domain` owns both repositories and the outbox of follow-up events.
//! Handlers never publish directly; they push into the outbox (or mutate a
//! repository, which records its own change events) and the bus drains both
//! after each handler returns.

use std::collections::HashMap;
use std::sync::Arc;

use testlib_events::{event_types, Event, EventSource};
use testlib_proto::{Job, JobType};

use crate::db::Store;
use crate::gateway::{AgentHub, ResourceFeed};
use crate::jobs::JobRepository;
use crate::resources::{ResourceEvent, ResourceRepository};

/// Everything that travels over the control plane's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    JobCreated(Job),
    JobDone(Job),
    JobExpired(Job),
    /// A done job, delivered under its job type's name.
    JobFinished(Job),
    Resource(ResourceEvent),
}

impl Event for ControlEvent {
    fn name(&self) -> &str {
        match self {
            ControlEvent::JobCreated(_) => event_types::JOB_CREATED,
            ControlEvent::JobDone(_) => event_types::JOB_DONE,
            ControlEvent::JobExpired(_) => event_types::JOB_EXPIRED,
            ControlEvent::JobFinished(job) => job.job_type().as_str(),
            ControlEvent::Resource(event) => event.kind.event_name(),
        }
    }
}

impl ControlEvent {
    pub fn job(&self) -> Option<&Job> {
        match self {
            ControlEvent::JobCreated(job)
            | ControlEvent::JobDone(job)
            | ControlEvent::JobExpired(job)
            | ControlEvent::JobFinished(job) => Some(job),
            ControlEvent::Resource(_) => None,
        }
    }
}

/// Hands out job creation timestamps that never repeat for a job type.
#[derive(Debug, Default)]
pub struct JobClock {
    last: HashMap<JobType, i64>,
}

impl JobClock {
    /// Returns `max(now_ms, previous + 1)` for `job_type` and records it.
    pub fn next(&mut self, job_type: JobType, now_ms: i64) -> i64 {
        let stamp = match self.last.get(&job_type) {
            Some(&previous) if previous >= now_ms => previous + 1,
            _ => now_ms,
        };
        self.last.insert(job_type, stamp);
        stamp
    }
}

/// Repositories plus the collaborators handlers talk to.
pub struct Domain {
    pub environment_key: String,
    pub resources: ResourceRepository,
    pub jobs: JobRepository,
    pub store: Arc<Store>,
    pub agents: AgentHub,
    pub feed: ResourceFeed,
    pub clock: JobClock,
    outbox: Vec<ControlEvent>,
}

impl Domain {
    pub fn new(
        environment_key: impl Into<String>,
        resources: ResourceRepository,
        store: Arc<Store>,
        agents: AgentHub,
        feed: ResourceFeed,
    ) -> Self {
        Self {
            environment_key: environment_key.into(),
            resources,
            jobs: JobRepository::new(),
            store,
            agents,
            feed,
            clock: JobClock::default(),
            outbox: Vec::new(),
        }
    }

    /// Queues an event for delivery after the current handler.
    pub fn emit(&mut self, event: ControlEvent) {
        self.outbox.push(event);
    }

    /// The environment prefix a returned job's key must start with.
    pub fn environment_prefix(&self) -> &str {
        self.environment_key
            .split('-')
            .next()
            .unwrap_or(&self.environment_key)
    }
}

impl EventSource<ControlEvent> for Domain {
    fn drain_events(&mut self) -> Vec<ControlEvent> {
        let mut events: Vec<ControlEvent> = self
            .resources
            .take_events()
            .into_iter()
            .map(ControlEvent::Resource)
            .collect();
        events.append(&mut self.outbox);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testlib_proto::JobParams;

    #[test]
    fn test_job_clock_never_repeats() {
        let mut clock = JobClock::default();
        assert_eq!(clock.next(JobType::Scan, 100), 100);
        assert_eq!(clock.next(JobType::Scan, 100), 101);
        assert_eq!(clock.next(JobType::Scan, 99), 102);
        assert_eq!(clock.next(JobType::Test, 100), 100);
        assert_eq!(clock.next(JobType::Scan, 500), 500);
    }

    #[test]
    fn test_event_names() {
        let job = Job::new("lab-01", JobParams::Scan, 1);
        assert_eq!(ControlEvent::JobCreated(job.clone()).name(), "job.created");
        assert_eq!(ControlEvent::JobExpired(job.clone()).name(), "job.expired");
        assert_eq!(ControlEvent::JobFinished(job).name(), "SCAN");
    }

    #[test]
    fn test_environment_prefix() {
        let store = Arc::new(Store::in_memory());
        let domain = Domain::new(
            "lab-east-1",
            ResourceRepository::new(store.clone()),
            store,
            AgentHub::default(),
            ResourceFeed::default(),
        );
        assert_eq!(domain.environment_prefix(), "lab");
    }
}
