//! Job lifecycle: creation, returned jobs, and expiry.
//!
//! Every function here runs against the domain while the caller holds it
//! exclusively, so creation, locking, and dispatch of one job cannot
//! interleave with another job's.

use testlib_id::ResourceId;
use testlib_proto::{error_codes, Job, JobParams, JobStatus, JobWire, ProtoError};
use tracing::{error, info, warn};

use crate::domain::{ControlEvent, Domain};
use crate::error::ControlError;
use crate::reactors::ControlBus;
use crate::resources::{now_ms, validation};

/// A request for a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub params: JobParams,
    pub targets: Vec<ResourceId>,
    pub ttl_ms: Option<i64>,
}

impl JobRequest {
    pub fn new(params: JobParams) -> Self {
        Self {
            params,
            targets: Vec::new(),
            ttl_ms: None,
        }
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Vec<ResourceId>) -> Self {
        self.targets = targets;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }
}

/// What happened to a job an agent sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Still running; the stored copy was refreshed.
    Progress,
    /// Finished; targets released and completion published.
    Completed,
    /// Belongs to another environment; dropped.
    ForeignEnvironment,
    /// Already finished here (possibly expired); dropped.
    AlreadyDone,
}

pub struct JobService;

impl JobService {
    /// Validates and creates a job, queueing job-created on the domain.
    ///
    /// The job is not dispatched until the bus delivers the queued events.
    pub fn create(domain: &mut Domain, request: JobRequest) -> Result<Job, ControlError> {
        let mut targets: Vec<ResourceId> = Vec::with_capacity(request.targets.len());
        for id in request.targets {
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        validation::ensure_available(&domain.resources, &targets)?;

        let job_type = request.params.job_type();
        let created = domain.clock.next(job_type, now_ms());
        let mut job = Job::new(domain.environment_key.clone(), request.params, created);
        if !targets.is_empty() {
            job = job.with_targets(targets);
        }
        if let Some(ttl) = request.ttl_ms {
            job = job.with_ttl(ttl);
        }

        info!(
            job_id = %job.id,
            targets = job.targets().len(),
            ttl_ms = job.ttl,
            "Job created"
        );
        domain.emit(ControlEvent::JobCreated(job.clone()));
        Ok(job)
    }

    /// Creates a job and delivers the resulting events (lock, save, dispatch).
    pub fn submit(
        domain: &mut Domain,
        bus: &ControlBus,
        request: JobRequest,
    ) -> Result<Job, ControlError> {
        let job = Self::create(domain, request)?;
        bus.flush(domain)?;
        Ok(job)
    }

    /// Accepts a job reported back by an agent.
    pub fn accept_returned(
        domain: &mut Domain,
        bus: &ControlBus,
        wire: JobWire,
    ) -> Result<Acceptance, ControlError> {
        let prefix = domain.environment_prefix();
        if prefix.is_empty()
            || wire.environment_key.is_empty()
            || !wire.environment_key.starts_with(prefix)
        {
            warn!(
                job_id = %wire.id,
                environment_key = %wire.environment_key,
                expected_prefix = %prefix,
                "Dropping returned job from another environment"
            );
            return Ok(Acceptance::ForeignEnvironment);
        }

        let job = match Job::try_from(wire) {
            Ok(job) => job,
            Err(e @ ProtoError::UnknownJobType(_)) => {
                error!(error = %e, "Returned job has an unknown type");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        if domain.jobs.is_archived(&job.id) {
            info!(job_id = %job.id, status = %job.status, "Ignoring job that already finished");
            return Ok(Acceptance::AlreadyDone);
        }

        // Locks are released from the record this control plane dispatched,
        // never from targets an agent reports.
        let mut job = job;
        let reported = job.targets.take();
        match domain.jobs.find_active(&job.id) {
            Some(stored) => job.targets = stored.targets.clone(),
            None if reported.as_ref().is_some_and(|t| !t.is_empty()) => {
                warn!(job_id = %job.id, "Ignoring targets of a job not dispatched here");
            }
            None => {}
        }

        if !job.done() {
            domain.jobs.save(job);
            return Ok(Acceptance::Progress);
        }

        if job.is_ok() {
            info!(job_id = %job.id, "Job finished");
        } else {
            error!(job_id = %job.id, errors = %job.error_summary(), "Job failed");
        }

        domain.jobs.save(job.clone());
        domain.emit(ControlEvent::JobDone(job.clone()));
        domain.emit(ControlEvent::JobFinished(job));
        bus.flush(domain)?;
        Ok(Acceptance::Completed)
    }

    /// Fails every job whose TTL elapsed. Returns how many expired.
    pub fn sweep_expired(
        domain: &mut Domain,
        bus: &ControlBus,
        now_ms: i64,
    ) -> Result<usize, ControlError> {
        let expired = domain.jobs.expired_ids(now_ms);

        for id in &expired {
            let Some(mut job) = domain.jobs.find_active(id).cloned() else {
                continue;
            };
            job.status = JobStatus::Failed;
            job.push_error(
                error_codes::JOB_EXPIRED,
                format!("job {} expired after {} ms", job.id, job.ttl),
            );
            warn!(job_id = %job.id, ttl_ms = job.ttl, "Job expired");

            domain.jobs.save(job.clone());
            domain.emit(ControlEvent::JobExpired(job));
        }

        bus.flush(domain)?;
        Ok(expired.len())
    }
}
