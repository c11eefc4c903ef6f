//! Job repository: active jobs plus a bounded archive of finished ones.

use std::collections::{HashMap, VecDeque};

use testlib_id::JobId;
use testlib_proto::Job;
use tracing::debug;

/// Finished jobs kept for redelivery detection.
pub const DONE_ARCHIVE_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct JobRepository {
    active: HashMap<JobId, Job>,
    done: HashMap<JobId, Job>,
    done_order: VecDeque<JobId>,
    capacity: usize,
}

impl Default for JobRepository {
    fn default() -> Self {
        Self::with_capacity(DONE_ARCHIVE_CAPACITY)
    }
}

impl JobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository whose archive holds at most `capacity` jobs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            done: HashMap::new(),
            done_order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Upserts an unfinished job into the active map, or moves a finished
    /// one into the archive.
    pub fn save(&mut self, job: Job) {
        if !job.done() {
            self.active.insert(job.id.clone(), job);
            return;
        }

        self.active.remove(&job.id);
        let id = job.id.clone();
        if self.done.insert(id.clone(), job).is_none() {
            self.done_order.push_back(id);
        }
        while self.done_order.len() > self.capacity {
            if let Some(oldest) = self.done_order.pop_front() {
                debug!(job_id = %oldest, "Evicting job from archive");
                self.done.remove(&oldest);
            }
        }
    }

    /// Looks up a job, active first.
    pub fn find(&self, id: &JobId) -> Option<&Job> {
        self.active.get(id).or_else(|| self.done.get(id))
    }

    pub fn find_active(&self, id: &JobId) -> Option<&Job> {
        self.active.get(id)
    }

    /// True if the job already finished here.
    pub fn is_archived(&self, id: &JobId) -> bool {
        self.done.contains_key(id)
    }

    /// Ids of active jobs whose TTL elapsed, oldest first.
    pub fn expired_ids(&self, now_ms: i64) -> Vec<JobId> {
        let mut expired: Vec<&Job> = self
            .active
            .values()
            .filter(|job| job.expired(now_ms))
            .collect();
        expired.sort_by_key(|job| job.created);
        expired.into_iter().map(|job| job.id.clone()).collect()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn archived_len(&self) -> usize {
        self.done.len()
    }
}
