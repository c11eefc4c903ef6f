//! Job lifecycle through the event bus: creation, locking, dispatch,
//! completion, expiry, and the follow-up reactors.

use std::sync::Arc;

use testlib_control_plane::{
    build_bus,
    db::{namespaces, Store},
    gateway::{AgentHub, ResourceFeed},
    jobs::{Acceptance, JobRequest, JobService},
    resources::{Health, Network, NetworkParams, NetworkState, Resource, ResourceKind, ResourceRepository},
    AppState, ControlBus, ControlError, Domain,
};
use testlib_id::ResourceId;
use testlib_proto::{
    error_codes, AgentFrame, AttachParams, Job, JobParams, JobStatus, JobType, JobWire,
    ProtoError, TargetParams,
};
use tokio::sync::mpsc;

const ENV: &str = "lab-01";

struct Harness {
    domain: Domain,
    bus: ControlBus,
    agent: mpsc::UnboundedReceiver<String>,
    store: Arc<Store>,
    target: ResourceId,
}

fn harness() -> Harness {
    harness_with_store(Arc::new(Store::in_memory()))
}

fn harness_with_store(store: Arc<Store>) -> Harness {
    let agents = AgentHub::default();
    let (_, agent) = agents.register();
    let mut resources = ResourceRepository::new(store.clone());
    let target = resources.make_id();
    resources
        .add(Resource::new(
            target.clone(),
            ENV,
            "ens1f0",
            ResourceKind::Network(Network {
                params: NetworkParams {
                    mac: "aa:bb:cc:dd:ee:01".into(),
                    ..Default::default()
                },
                state: NetworkState {
                    health: Health::Ok,
                    ..Default::default()
                },
            }),
            1,
        ))
        .unwrap();
    resources.take_events();

    Harness {
        domain: Domain::new(ENV, resources, store.clone(), agents, ResourceFeed::default()),
        bus: build_bus(),
        agent,
        store,
        target,
    }
}

fn attach(target: &ResourceId) -> JobRequest {
    JobRequest::new(JobParams::ExportAddIscsi(AttachParams {
        ip: "10.0.0.5".into(),
        target: target.to_string(),
    }))
    .with_targets(vec![target.clone(), target.clone()])
}

fn finished(job: &Job, status: JobStatus) -> JobWire {
    let mut job = job.clone();
    job.status = status;
    JobWire::from(job)
}

fn next_jobs(agent: &mut mpsc::UnboundedReceiver<String>) -> Vec<JobWire> {
    match AgentFrame::decode(&agent.try_recv().unwrap()).unwrap() {
        AgentFrame::JobNew(jobs) => jobs,
        other => panic!("expected job:new, got {}", other.event()),
    }
}

#[test]
fn test_submit_locks_saves_and_dispatches() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();

    assert_eq!(job.targets(), &[h.target.clone()]);
    assert!(job.id.to_string().starts_with("EXPORT_ADD_ISCSI-"));
    assert!(h.domain.resources.find(&h.target).unwrap().locked);
    assert!(h.domain.jobs.find_active(&job.id).is_some());

    let dispatched = next_jobs(&mut h.agent);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].id, job.id.to_string());
    assert_eq!(dispatched[0].tgt.as_deref(), Some(&[h.target.clone()][..]));
}

#[test]
fn test_busy_target_is_rejected() {
    let mut h = harness();
    JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();
    let err = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));
    assert!(err.is_client_error());
}

#[test]
fn test_same_millisecond_jobs_get_distinct_ids() {
    let mut h = harness();
    let a = JobService::submit(&mut h.domain, &h.bus, JobRequest::new(JobParams::Scan)).unwrap();
    let b = JobService::submit(&mut h.domain, &h.bus, JobRequest::new(JobParams::Scan)).unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(h.domain.jobs.active_len(), 2);
}

#[test]
fn test_completion_unlocks_targets() {
    for status in [JobStatus::Ok, JobStatus::Failed] {
        let mut h = harness();
        let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();

        let outcome =
            JobService::accept_returned(&mut h.domain, &h.bus, finished(&job, JobStatus::Processing))
                .unwrap();
        assert_eq!(outcome, Acceptance::Progress);
        assert!(h.domain.resources.find(&h.target).unwrap().locked);

        let outcome =
            JobService::accept_returned(&mut h.domain, &h.bus, finished(&job, status)).unwrap();
        assert_eq!(outcome, Acceptance::Completed);
        assert!(!h.domain.resources.find(&h.target).unwrap().locked);
        assert_eq!(h.domain.jobs.active_len(), 0);
        assert!(h.domain.jobs.is_archived(&job.id));
    }
}

#[test]
fn test_undispatched_job_cannot_unlock_held_target() {
    let mut h = harness();
    let held = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();

    let stray = Job::new(
        ENV,
        JobParams::ExportRmIscsi(TargetParams {
            target: "iqn.a".into(),
        }),
        5,
    )
    .with_targets(vec![h.target.clone()]);
    let outcome =
        JobService::accept_returned(&mut h.domain, &h.bus, finished(&stray, JobStatus::Failed))
            .unwrap();

    assert_eq!(outcome, Acceptance::Completed);
    assert!(h.domain.jobs.find_active(&held.id).is_some());
    assert!(h.domain.resources.find(&h.target).unwrap().locked);
    assert!(h.domain.jobs.find(&stray.id).unwrap().targets().is_empty());
}

#[test]
fn test_returned_job_without_targets_still_unlocks() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();

    let mut returned = JobWire::from(&job);
    returned.status = JobStatus::Processing;
    returned.tgt = None;
    JobService::accept_returned(&mut h.domain, &h.bus, returned.clone()).unwrap();
    assert_eq!(
        h.domain.jobs.find_active(&job.id).unwrap().targets(),
        &[h.target.clone()]
    );

    returned.status = JobStatus::Ok;
    let outcome = JobService::accept_returned(&mut h.domain, &h.bus, returned).unwrap();

    assert_eq!(outcome, Acceptance::Completed);
    assert!(h.domain.jobs.is_archived(&job.id));
    assert!(!h.domain.resources.find(&h.target).unwrap().locked);
}

#[test]
fn test_foreign_environment_is_dropped() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();

    let mut wire = finished(&job, JobStatus::Ok);
    wire.environment_key = "prod-01".into();
    let outcome = JobService::accept_returned(&mut h.domain, &h.bus, wire).unwrap();
    assert_eq!(outcome, Acceptance::ForeignEnvironment);
    assert!(h.domain.resources.find(&h.target).unwrap().locked);

    let mut wire = finished(&job, JobStatus::Ok);
    wire.environment_key = String::new();
    let outcome = JobService::accept_returned(&mut h.domain, &h.bus, wire).unwrap();
    assert_eq!(outcome, Acceptance::ForeignEnvironment);

    // Same prefix, other suffix: accepted.
    let mut wire = finished(&job, JobStatus::Ok);
    wire.environment_key = "lab-02".into();
    let outcome = JobService::accept_returned(&mut h.domain, &h.bus, wire).unwrap();
    assert_eq!(outcome, Acceptance::Completed);
}

#[test]
fn test_empty_environment_prefix_accepts_nothing() {
    let store = Arc::new(Store::in_memory());
    let mut domain = Domain::new(
        "-01",
        ResourceRepository::new(store.clone()),
        store,
        AgentHub::default(),
        ResourceFeed::default(),
    );
    let bus = build_bus();

    let mut job = Job::new("lab-01", JobParams::Scan, 1);
    job.status = JobStatus::Ok;
    let outcome = JobService::accept_returned(&mut domain, &bus, JobWire::from(job)).unwrap();
    assert_eq!(outcome, Acceptance::ForeignEnvironment);
}

#[test]
fn test_unknown_job_type_is_an_error() {
    let mut h = harness();
    let mut wire = JobWire::from(Job::new(ENV, JobParams::Scan, 1));
    wire.id = "MYSTERY-1".into();
    wire.job_type = "MYSTERY".into();
    wire.status = JobStatus::Ok;

    let err = JobService::accept_returned(&mut h.domain, &h.bus, wire).unwrap_err();
    assert!(matches!(err, ControlError::Proto(ProtoError::UnknownJobType(ref t)) if t == "MYSTERY"));
}

#[test]
fn test_expiry_fails_job_and_releases_targets() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target).with_ttl(100)).unwrap();

    let swept = JobService::sweep_expired(&mut h.domain, &h.bus, job.created + 100).unwrap();
    assert_eq!(swept, 0);

    let swept = JobService::sweep_expired(&mut h.domain, &h.bus, job.created + 101).unwrap();
    assert_eq!(swept, 1);
    assert_eq!(h.domain.jobs.active_len(), 0);

    let expired = h.domain.jobs.find(&job.id).unwrap();
    assert_eq!(expired.status, JobStatus::Failed);
    assert_eq!(expired.result.errors[0].code, error_codes::JOB_EXPIRED);
    assert!(!h.domain.resources.find(&h.target).unwrap().locked);

    // A late result must not touch the resource again.
    JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();
    let outcome =
        JobService::accept_returned(&mut h.domain, &h.bus, finished(&job, JobStatus::Ok)).unwrap();
    assert_eq!(outcome, Acceptance::AlreadyDone);
    assert!(h.domain.resources.find(&h.target).unwrap().locked);
}

#[test]
fn test_export_added_triggers_test_job_and_result_is_stored() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();
    next_jobs(&mut h.agent);

    JobService::accept_returned(&mut h.domain, &h.bus, finished(&job, JobStatus::Ok)).unwrap();

    let dispatched = next_jobs(&mut h.agent);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].job_type, JobType::Test.as_str());
    let test_job = Job::try_from(dispatched[0].clone()).unwrap();
    assert_eq!(
        test_job.params,
        JobParams::Test(TargetParams {
            target: "test".into()
        })
    );

    let mut done = test_job.clone();
    done.status = JobStatus::Ok;
    done.result.extra.insert("latency_ms".into(), serde_json::json!(3));
    JobService::accept_returned(&mut h.domain, &h.bus, JobWire::from(done)).unwrap();

    let stored = h
        .store
        .fetch(namespaces::JOBS, &test_job.id.to_string())
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&stored).unwrap();
    assert_eq!(value["latency_ms"], 3);
}

#[test]
fn test_failed_export_add_does_not_trigger_test() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, attach(&h.target)).unwrap();
    next_jobs(&mut h.agent);

    JobService::accept_returned(&mut h.domain, &h.bus, finished(&job, JobStatus::Failed)).unwrap();
    assert!(h.agent.try_recv().is_err());
}

#[test]
fn test_scan_result_is_reconciled_and_fed() {
    let mut h = harness();
    let job = JobService::submit(&mut h.domain, &h.bus, JobRequest::new(JobParams::Scan)).unwrap();

    let mut done = job.clone();
    done.status = JobStatus::Ok;
    done.result.resources = Some(serde_json::json!({
        "net_interfaces": [{ "driver": "ICE", "ports": [
            { "name": "ens2f0", "mac": "aa:bb:cc:dd:ee:ff", "health": "OK" }
        ]}]
    }));
    JobService::accept_returned(&mut h.domain, &h.bus, JobWire::from(done)).unwrap();

    // The known port is missing from the scan; the new one was created.
    assert_eq!(h.domain.resources.len(), 2);
    assert_eq!(
        h.domain.resources.find(&h.target).unwrap().health(),
        Health::Lost
    );
    let frames = h.domain.feed.drain();
    let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
    assert_eq!(events, vec!["resource:updated", "resource:created"]);
}

#[tokio::test]
async fn test_lost_write_shuts_the_process_down() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let store = Arc::new(Store::open(data_dir.join("db.json")).unwrap());
    let h = harness_with_store(store);

    std::fs::remove_dir_all(&data_dir).unwrap();
    std::fs::write(&data_dir, b"not a directory").unwrap();

    let state = AppState::new(h.domain, h.bus);
    let shutdown = state.shutdown_signal();
    let err = state.submit_job(attach(&h.target)).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(*shutdown.borrow());
}
