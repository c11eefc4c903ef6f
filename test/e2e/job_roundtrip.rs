//! End-to-end job round trip.
//!
//! Runs a control plane on an ephemeral port and a real agent link plus
//! worker against it, with a scripted executor in place of the automation
//! tool. Verifies:
//!
//! 1. A submitted job reaches the agent, runs, and unlocks its target
//! 2. A periodic SCAN is reconciled into the inventory
//! 3. An export add triggers a TEST job whose result is stored
//!
//! ## Running
//!
//! ```bash
//! cargo test -p testlib-e2e --test job_roundtrip
//! ```

use std::sync::Arc;
use std::time::Duration;

use testlib_agent::client::BackoffPolicy;
use testlib_agent::{AgentWorker, ControlLink, MockExecutor, WorkerConfig};
use testlib_control_plane::{
    api, build_bus,
    db::{namespaces, Store},
    gateway::{AgentHub, ResourceFeed},
    jobs::JobRequest,
    resources::{Network, NetworkParams, NetworkState, Resource, ResourceKind, ResourceRepository},
    AppState, Domain,
};
use testlib_id::ResourceId;
use testlib_proto::{AttachParams, JobParams, JobStatus, JobType};
use tokio::net::TcpListener;
use tokio::sync::watch;

const ENV: &str = "lab-01";

struct Cluster {
    control: AppState,
    store: Arc<Store>,
    target: ResourceId,
    shutdown: watch::Sender<bool>,
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

async fn start(executor: MockExecutor, scan_interval: Duration) -> Cluster {
    init_tracing();

    let store = Arc::new(Store::in_memory());
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
                state: NetworkState::default(),
            }),
            1,
        ))
        .unwrap();
    resources.take_events();

    let domain = Domain::new(
        ENV,
        resources,
        store.clone(),
        AgentHub::default(),
        ResourceFeed::default(),
    );
    let control = AppState::new(domain, build_bus());
    let app = api::create_router(control.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (shutdown, shutdown_rx) = watch::channel(false);
    let (link, sender, inbound) = ControlLink::new(format!("ws://{addr}/agent"));
    let link = link.with_backoff(BackoffPolicy {
        base: Duration::from_millis(20),
        max: Duration::from_millis(100),
        jitter: 0.0,
    });
    tokio::spawn(link.run(shutdown_rx.clone()));

    let worker = AgentWorker::new(
        WorkerConfig {
            environment_key: ENV.to_string(),
            run_interval: Duration::from_millis(20),
            scan_interval,
        },
        Arc::new(executor),
        sender,
        inbound,
    );
    tokio::spawn(worker.run(shutdown_rx));

    let agents = control.agents().clone();
    wait_until("agent connected", || {
        let agents = agents.clone();
        async move { agents.count() == 1 }
    })
    .await;

    Cluster {
        control,
        store,
        target,
        shutdown,
    }
}

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn no_scans() -> Duration {
    Duration::from_secs(3600)
}

#[tokio::test]
async fn test_job_runs_on_agent_and_unlocks_target() {
    let executor = MockExecutor::new().with_delay(Duration::from_millis(200));
    let cluster = start(executor, no_scans()).await;

    let job = cluster
        .control
        .submit_job(
            JobRequest::new(JobParams::NetdevConf(AttachParams {
                ip: "10.0.0.5".into(),
                target: cluster.target.to_string(),
            }))
            .with_targets(vec![cluster.target.clone()]),
        )
        .await
        .unwrap();

    let locked = cluster
        .control
        .with_domain(|d| d.resources.find(&cluster.target).map(|r| r.locked))
        .await;
    assert_eq!(locked, Some(true));

    let control = cluster.control.clone();
    let id = job.id.clone();
    wait_until("job archived", || {
        let control = control.clone();
        let id = id.clone();
        async move { control.with_domain(|d| d.jobs.is_archived(&id)).await }
    })
    .await;

    let (status, locked) = cluster
        .control
        .with_domain(|d| {
            (
                d.jobs.find(&job.id).map(|j| j.status),
                d.resources.find(&cluster.target).map(|r| r.locked),
            )
        })
        .await;
    assert_eq!(status, Some(JobStatus::Ok));
    assert_eq!(locked, Some(false));
}

#[tokio::test]
async fn test_periodic_scan_updates_inventory() {
    let scan = MockExecutor::report(serde_json::json!({
        "environment_key": ENV,
        "resources": {
            "net_interfaces": [{
                "id": "0000:3b:00",
                "driver": "mlx5_core",
                "fullName": "Mellanox ConnectX-6",
                "pciSlot": "0000:3b:00.0",
                "numaId": "0",
                "ports": [
                    { "name": "ens1f0", "mac": "AA:BB:CC:DD:EE:01", "status": "up", "health": "OK" },
                    { "name": "ens1f1", "mac": "aa:bb:cc:dd:ee:02", "status": "down" }
                ]
            }]
        }
    }));
    let executor = MockExecutor::new().with_output(JobType::Scan, scan);
    let cluster = start(executor, Duration::from_millis(100)).await;

    let control = cluster.control.clone();
    wait_until("scanned port created", || {
        let control = control.clone();
        async move {
            control
                .with_domain(|d| {
                    d.resources.iter().any(|r| match &r.kind {
                        ResourceKind::Network(n) => n.params.mac == "aa:bb:cc:dd:ee:02",
                        _ => false,
                    })
                })
                .await
        }
    })
    .await;

    let (count, status) = cluster
        .control
        .with_domain(|d| {
            let status = d.resources.find(&cluster.target).and_then(|r| match &r.kind {
                ResourceKind::Network(n) => n.state.status.clone(),
                _ => None,
            });
            (d.resources.len(), status)
        })
        .await;
    assert_eq!(count, 2);
    assert_eq!(status.as_deref(), Some("up"));
}

#[tokio::test]
async fn test_export_add_runs_follow_up_test() {
    let test_report = MockExecutor::report(serde_json::json!({
        "environment_key": ENV,
        "fio": { "read_iops": 1000 }
    }));
    let executor = MockExecutor::new().with_output(JobType::Test, test_report);
    let cluster = start(executor, no_scans()).await;

    let job = cluster
        .control
        .submit_job(JobRequest::new(JobParams::ExportAddIscsi(AttachParams {
            ip: "10.0.0.5".into(),
            target: "iqn.2024-01.lab:disk0".into(),
        })))
        .await
        .unwrap();

    let store = cluster.store.clone();
    wait_until("test result stored", || {
        let store = store.clone();
        async move {
            store
                .fetch_all(namespaces::JOBS)
                .map(|entries| !entries.is_empty())
                .unwrap_or(false)
        }
    })
    .await;

    let entries = cluster.store.fetch_all(namespaces::JOBS).unwrap();
    assert_eq!(entries.len(), 1);
    let (key, value) = &entries[0];
    assert!(key.starts_with("TEST"));
    let stored: serde_json::Value = serde_json::from_str(value).unwrap();
    assert_eq!(stored["fio"]["read_iops"], 1000);

    let archived = cluster
        .control
        .with_domain(|d| d.jobs.is_archived(&job.id))
        .await;
    assert!(archived);
}
