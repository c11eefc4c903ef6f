//! Jobs: repository, lifecycle service, and the expiry worker.

mod repository;
mod service;
mod worker;

pub use repository::{JobRepository, DONE_ARCHIVE_CAPACITY};
pub use service::{Acceptance, JobRequest, JobService};
pub use worker::ExpiryWorker;
