//! Event bus wiring.
//!
//! All handlers are registered here, once, at startup. Order of registration
//! is order of delivery: a created job is locked, then saved, then sent to
//! the agents.

use testlib_events::{event_types, EventBus, HandlerError};
use testlib_proto::{AgentFrame, JobParams, JobType, TargetParams};
use tracing::{debug, info};

use crate::db::namespaces;
use crate::domain::{ControlEvent, Domain};
use crate::error::ControlError;
use crate::jobs::{JobRequest, JobService};
use crate::reconciler;

/// The control plane's event bus.
pub type ControlBus = EventBus<Domain, ControlEvent>;

type Reactor = fn(&mut Domain, &ControlEvent) -> Result<(), ControlError>;

/// Target name of the smoke test run after an export is added.
pub const TEST_TARGET: &str = "test";

/// Builds the bus with every reactor registered.
pub fn build_bus() -> ControlBus {
    let mut bus = ControlBus::new();

    bus.on(event_types::JOB_CREATED, wrap(lock_targets))
        .on(event_types::JOB_CREATED, wrap(save_job))
        .on(event_types::JOB_CREATED, wrap(dispatch_job))
        .on(event_types::JOB_DONE, wrap(unlock_targets))
        .on(event_types::JOB_EXPIRED, wrap(unlock_targets));

    for name in [
        event_types::RESOURCE_CREATED,
        event_types::RESOURCE_UPDATED,
        event_types::RESOURCE_DELETED,
    ] {
        bus.on(name, wrap(feed_resource));
    }

    bus.on(JobType::Scan.as_str(), wrap(reconcile_scan))
        .on(JobType::ExportAddIscsi.as_str(), wrap(submit_test_job))
        .on(JobType::ExportAddNvme.as_str(), wrap(submit_test_job))
        .on(JobType::Test.as_str(), wrap(store_test_result));

    bus
}

fn wrap(
    reactor: Reactor,
) -> impl Fn(&mut Domain, &ControlEvent) -> Result<(), HandlerError> + Send + Sync + 'static {
    move |domain: &mut Domain, event: &ControlEvent| reactor(domain, event).map_err(Into::into)
}

fn lock_targets(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    if let Some(job) = event.job() {
        domain.resources.lock_all(job.targets())?;
    }
    Ok(())
}

fn save_job(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    if let Some(job) = event.job() {
        domain.jobs.save(job.clone());
    }
    Ok(())
}

fn dispatch_job(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    if let Some(job) = event.job() {
        let agents = domain.agents.broadcast(&AgentFrame::job_new([job]))?;
        if agents == 0 {
            info!(job_id = %job.id, "No agent connected; job waits for expiry");
        } else {
            debug!(job_id = %job.id, agents, "Job dispatched");
        }
    }
    Ok(())
}

fn unlock_targets(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    if let Some(job) = event.job() {
        domain.resources.unlock_all(job.targets())?;
    }
    Ok(())
}

fn feed_resource(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    if let ControlEvent::Resource(change) = event {
        domain.feed.push(change.kind, &change.resource);
    }
    Ok(())
}

fn reconcile_scan(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    if let Some(job) = event.job() {
        reconciler::reconcile(domain, job)?;
    }
    Ok(())
}

fn submit_test_job(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    let Some(job) = event.job().filter(|job| job.is_ok()) else {
        return Ok(());
    };
    let test = JobService::create(
        domain,
        JobRequest::new(JobParams::Test(TargetParams {
            target: TEST_TARGET.to_string(),
        })),
    )?;
    info!(job_id = %job.id, test_job_id = %test.id, "Export added; testing it");
    Ok(())
}

fn store_test_result(domain: &mut Domain, event: &ControlEvent) -> Result<(), ControlError> {
    let Some(job) = event.job().filter(|job| job.is_ok()) else {
        return Ok(());
    };
    let value = serde_json::to_string(&job.result)?;
    domain
        .store
        .save(namespaces::JOBS, &job.id.to_string(), value)?;
    debug!(job_id = %job.id, "Stored test result");
    Ok(())
}
