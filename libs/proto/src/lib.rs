//! # testlib-proto
//!
//! Wire contract shared by the control plane and its agents.
//!
//! ## Contents
//!
//! - [`Job`] and its lifecycle vocabulary ([`JobType`], [`JobStatus`], [`JobResult`])
//! - Typed per-type job parameters ([`JobParams`]) decoded through an
//!   exhaustive dispatch table keyed by [`JobType`]
//! - The inventory reported by SCAN jobs ([`ScanInventory`])
//! - Agent channel frames ([`AgentFrame`])
//!
//! Jobs travel as [`JobWire`]: the type tag is kept as text so that an
//! unrecognised tag surfaces as [`ProtoError::UnknownJobType`] at the point of
//! conversion instead of disappearing inside a generic parse failure.

mod channel;
mod error;
mod job;
mod params;
mod scan;

pub use channel::*;
pub use error::ProtoError;
pub use job::*;
pub use params::*;
pub use scan::*;
