//! # testlib-id
//!
//! Identifier types for the testlib control plane and its agents.
//!
//! ## Design Principles
//!
//! - IDs are system-generated; resource names are user-controlled labels
//! - Every ID has a canonical string form with strict parsing
//! - IDs are typed so a job id can never be passed where a resource id is expected
//!
//! ## ID Formats
//!
//! | Type         | Format                         | Example              |
//! |--------------|--------------------------------|----------------------|
//! | `ResourceId` | `tid_` + 2 digits + 4 letters  | `tid_42qwer`         |
//! | `JobId`      | `<TYPE>-<creation millis>`     | `SCAN-1700000000000` |
//! | `AgentId`    | UUID v4 (one per connection)   |                      |
//!
//! Resource ids have a small keyspace (89 * 26^4), so generation is paired
//! with a collision check by the owning repository.

mod error;
mod types;

pub use error::IdError;
pub use types::*;
