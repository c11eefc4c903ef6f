//! The agent's main loop.
//!
//! The worker owns the [`CommandQueue`]. Each run tick starts every job whose
//! targets are free; each job runs in its own task and reports its progress
//! to the control plane as `job:save` frames. A SCAN job is started on the
//! scan tick and skips the queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use testlib_proto::{error_codes, AgentFrame, Job, JobParams, JobStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::LinkSender;
use crate::executor::{execute, Executor};
use crate::scheduler::{CommandQueue, Rejection};

/// Worker timing.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment_key: String,
    pub run_interval: Duration,
    pub scan_interval: Duration,
}

pub struct AgentWorker {
    config: WorkerConfig,
    queue: CommandQueue,
    executor: Arc<dyn Executor>,
    link: LinkSender,
    inbound: mpsc::Receiver<AgentFrame>,
    tasks: JoinSet<Job>,
}

impl AgentWorker {
    pub fn new(
        config: WorkerConfig,
        executor: Arc<dyn Executor>,
        link: LinkSender,
        inbound: mpsc::Receiver<AgentFrame>,
    ) -> Self {
        Self {
            queue: CommandQueue::new(config.environment_key.clone()),
            config,
            executor,
            link,
            inbound,
            tasks: JoinSet::new(),
        }
    }

    /// Runs until shutdown or until the link goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            environment_key = %self.config.environment_key,
            run_interval_ms = self.config.run_interval.as_millis() as u64,
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            "Starting agent worker"
        );

        let mut run_tick = interval(self.config.run_interval);
        run_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut scan_tick = interval_at(
            Instant::now() + self.config.scan_interval,
            self.config.scan_interval,
        );
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = run_tick.tick() => self.start_runnable(),
                _ = scan_tick.tick() => self.start_scan(),
                frame = self.inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => {
                        warn!("Control plane link closed, stopping worker");
                        break;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok(job) => {
                            debug!(job_id = %job.id, status = %job.status, "Job finished");
                            self.queue.complete(&job);
                        }
                        Err(e) => error!(error = %e, "Job task aborted"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Agent worker shutting down");
                    break;
                }
            }
        }

        if !self.tasks.is_empty() {
            warn!(running = self.tasks.len(), "Abandoning running jobs");
        }
        self.tasks.shutdown().await;
    }

    fn handle_frame(&mut self, frame: AgentFrame) {
        match frame {
            AgentFrame::JobNew(wires) => {
                for wire in wires {
                    let id = wire.id.clone();
                    let job = match Job::try_from(wire) {
                        Ok(job) => job,
                        Err(e) => {
                            warn!(job_id = %id, error = %e, "Ignoring undecodable job");
                            continue;
                        }
                    };
                    let job_id = job.id.clone();
                    match self.queue.enqueue(job) {
                        Ok(()) => {}
                        Err(Rejection::ForeignEnvironment) => {
                            debug!(job_id = %job_id, "Ignoring job for another environment");
                        }
                        Err(Rejection::Duplicate) => {
                            debug!(job_id = %job_id, "Ignoring redelivered job");
                        }
                    }
                }
            }
            AgentFrame::JobSave(wire) => {
                warn!(job_id = %wire.id, "Unexpected job:save from control plane");
            }
        }
    }

    fn start_runnable(&mut self) {
        for job in self.queue.drain_runnable() {
            self.spawn(job);
        }
    }

    fn start_scan(&mut self) {
        let job = Job::new(
            self.config.environment_key.clone(),
            JobParams::Scan,
            Utc::now().timestamp_millis(),
        );
        self.spawn(job);
    }

    fn spawn(&mut self, job: Job) {
        info!(job_id = %job.id, targets = job.targets().len(), "Starting job");
        let executor = self.executor.clone();
        let link = self.link.clone();
        self.tasks.spawn(run_job(executor, link, job));
    }
}

/// Runs one job, reporting PROCESSING before and the outcome after.
pub async fn run_job(executor: Arc<dyn Executor>, link: LinkSender, mut job: Job) -> Job {
    job.status = JobStatus::Processing;
    link.send(AgentFrame::job_save(&job));

    let started = job.clone();
    let outcome = AssertUnwindSafe(async move {
        execute(executor.as_ref(), &mut job).await;
        job
    })
    .catch_unwind()
    .await;

    let job = match outcome {
        Ok(job) => job,
        Err(_) => {
            error!(job_id = %started.id, "Executor panicked");
            let mut job = started;
            job.status = JobStatus::Failed;
            job.push_error(error_codes::EXECUTION_ERROR, "AGENT job execution panicked");
            job
        }
    };

    if job.is_ok() {
        info!(job_id = %job.id, "Job succeeded");
    } else {
        warn!(job_id = %job.id, errors = %job.error_summary(), "Job failed");
    }
    link.send(AgentFrame::job_save(&job));
    job
}
