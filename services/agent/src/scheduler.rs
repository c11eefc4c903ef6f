//! Admission control for local execution.
//!
//! Jobs wait in arrival order. A job may start only when none of its targets
//! is held by a running job; an older blocked job does not hold back a
//! younger one whose targets are free. Jobs without targets always start.
//! Ids of finished jobs are remembered (up to [`FINISHED_CAPACITY`]) so a
//! redelivered job never runs twice.

use std::collections::{HashSet, VecDeque};

use testlib_id::{JobId, ResourceId};
use testlib_proto::Job;
use tracing::debug;

/// How many finished job ids are remembered for redelivery checks.
pub const FINISHED_CAPACITY: usize = 10_000;

/// Why a job was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The same id is already queued, running, or finished.
    Duplicate,
    /// The job belongs to another environment.
    ForeignEnvironment,
}

/// Queue of jobs waiting to run plus the set of busy targets.
#[derive(Debug)]
pub struct CommandQueue {
    environment_key: String,
    queue: VecDeque<Job>,
    busy: HashSet<ResourceId>,
    running: HashSet<JobId>,
    finished: HashSet<JobId>,
    finished_order: VecDeque<JobId>,
    finished_capacity: usize,
}

impl CommandQueue {
    pub fn new(environment_key: impl Into<String>) -> Self {
        Self::with_capacity(environment_key, FINISHED_CAPACITY)
    }

    /// Like [`CommandQueue::new`] with a custom finished-id memory.
    pub fn with_capacity(environment_key: impl Into<String>, finished_capacity: usize) -> Self {
        Self {
            environment_key: environment_key.into(),
            queue: VecDeque::new(),
            busy: HashSet::new(),
            running: HashSet::new(),
            finished: HashSet::new(),
            finished_order: VecDeque::new(),
            finished_capacity,
        }
    }

    /// Queues a job unless it is a redelivery or meant for someone else.
    pub fn enqueue(&mut self, job: Job) -> Result<(), Rejection> {
        if job.environment_key != self.environment_key {
            return Err(Rejection::ForeignEnvironment);
        }
        if self.running.contains(&job.id)
            || self.finished.contains(&job.id)
            || self.queue.iter().any(|queued| queued.id == job.id)
        {
            return Err(Rejection::Duplicate);
        }
        debug!(job_id = %job.id, queued = self.queue.len() + 1, "Job queued");
        self.queue.push_back(job);
        Ok(())
    }

    /// Takes the oldest job whose targets are all free and reserves them.
    pub fn next(&mut self) -> Option<Job> {
        let position = self
            .queue
            .iter()
            .position(|job| job.targets().iter().all(|id| !self.busy.contains(id)))?;
        let job = self.queue.remove(position)?;
        self.busy.extend(job.targets().iter().cloned());
        self.running.insert(job.id.clone());
        Some(job)
    }

    /// Takes every job that can start now, oldest first.
    pub fn drain_runnable(&mut self) -> Vec<Job> {
        std::iter::from_fn(|| self.next()).collect()
    }

    /// Releases the targets of a finished job and remembers its id.
    pub fn complete(&mut self, job: &Job) {
        if self.running.remove(&job.id) {
            for id in job.targets() {
                self.busy.remove(id);
            }
        }
        if self.finished.insert(job.id.clone()) {
            self.finished_order.push_back(job.id.clone());
        }
        while self.finished_order.len() > self.finished_capacity {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn is_busy(&self, id: &ResourceId) -> bool {
        self.busy.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use testlib_proto::{JobParams, TargetParams};

    const ENV: &str = "lab-01";

    fn rid(n: usize) -> ResourceId {
        let letter = (b'a' + n as u8) as char;
        ResourceId::parse(&format!("tid_10{letter}{letter}{letter}{letter}")).unwrap()
    }

    fn job(created: i64, targets: &[usize]) -> Job {
        let job = Job::new(
            ENV,
            JobParams::Test(TargetParams {
                target: "test".into(),
            }),
            created,
        );
        if targets.is_empty() {
            job
        } else {
            let mut ids: Vec<ResourceId> = targets.iter().map(|&n| rid(n)).collect();
            ids.sort();
            ids.dedup();
            job.with_targets(ids)
        }
    }

    #[test]
    fn test_skip_over_fifo() {
        let mut queue = CommandQueue::new(ENV);
        queue.enqueue(job(1, &[0])).unwrap();
        queue.enqueue(job(2, &[0, 1])).unwrap();
        queue.enqueue(job(3, &[2])).unwrap();

        let first = queue.next().unwrap();
        assert_eq!(first.created, 1);
        // Job 2 is blocked on target 0; job 3 runs ahead of it.
        let second = queue.next().unwrap();
        assert_eq!(second.created, 3);
        assert!(queue.next().is_none());

        queue.complete(&first);
        assert_eq!(queue.next().unwrap().created, 2);
    }

    #[test]
    fn test_jobs_without_targets_never_block() {
        let mut queue = CommandQueue::new(ENV);
        queue.enqueue(job(1, &[0])).unwrap();
        queue.enqueue(job(2, &[0])).unwrap();
        queue.enqueue(job(3, &[])).unwrap();
        queue.enqueue(job(4, &[])).unwrap();

        let runnable: Vec<i64> = queue.drain_runnable().iter().map(|j| j.created).collect();
        assert_eq!(runnable, vec![1, 3, 4]);
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.running(), 3);
    }

    #[test]
    fn test_duplicates_and_foreign_jobs_rejected() {
        let mut queue = CommandQueue::new(ENV);
        queue.enqueue(job(1, &[0])).unwrap();
        assert_eq!(queue.enqueue(job(1, &[0])), Err(Rejection::Duplicate));

        let running = queue.next().unwrap();
        assert_eq!(queue.enqueue(job(1, &[0])), Err(Rejection::Duplicate));
        queue.complete(&running);
        // Finished jobs are not run again.
        assert_eq!(queue.enqueue(job(1, &[0])), Err(Rejection::Duplicate));

        let mut foreign = job(9, &[]);
        foreign.environment_key = "prod-01".into();
        assert_eq!(queue.enqueue(foreign), Err(Rejection::ForeignEnvironment));
    }

    #[test]
    fn test_finished_ids_are_forgotten_past_capacity() {
        let mut queue = CommandQueue::with_capacity(ENV, 2);
        for created in 1..=3 {
            queue.enqueue(job(created, &[])).unwrap();
            let running = queue.next().unwrap();
            queue.complete(&running);
        }

        // Job 1 fell out of memory; jobs 2 and 3 are still remembered.
        assert!(queue.enqueue(job(1, &[])).is_ok());
        assert_eq!(queue.enqueue(job(2, &[])), Err(Rejection::Duplicate));
        assert_eq!(queue.enqueue(job(3, &[])), Err(Rejection::Duplicate));
    }

    #[test]
    fn test_complete_releases_targets() {
        let mut queue = CommandQueue::new(ENV);
        queue.enqueue(job(1, &[0, 1])).unwrap();
        let running = queue.next().unwrap();
        assert!(queue.is_busy(&rid(0)) && queue.is_busy(&rid(1)));

        queue.complete(&running);
        assert!(!queue.is_busy(&rid(0)) && !queue.is_busy(&rid(1)));
        // Completing twice is harmless.
        queue.complete(&running);
        assert_eq!(queue.running(), 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Enqueue(Vec<usize>),
        Pick,
        Finish(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            proptest::collection::vec(0usize..5, 0..3).prop_map(Step::Enqueue),
            Just(Step::Pick),
            (0usize..8).prop_map(Step::Finish),
        ]
    }

    proptest! {
        #[test]
        fn test_running_jobs_never_share_targets(steps in proptest::collection::vec(step(), 1..60)) {
            let mut queue = CommandQueue::new(ENV);
            let mut running: Vec<Job> = Vec::new();
            let mut created = 0;

            for step in steps {
                match step {
                    Step::Enqueue(targets) => {
                        created += 1;
                        queue.enqueue(job(created, &targets)).unwrap();
                    }
                    Step::Pick => {
                        if let Some(job) = queue.next() {
                            running.push(job);
                        }
                    }
                    Step::Finish(index) => {
                        if !running.is_empty() {
                            let job = running.remove(index % running.len());
                            queue.complete(&job);
                        }
                    }
                }

                let mut held = HashSet::new();
                for job in &running {
                    for target in job.targets() {
                        prop_assert!(held.insert(target.clone()), "target {} held twice", target);
                    }
                }
                prop_assert_eq!(queue.running(), running.len());
            }
        }
    }
}
