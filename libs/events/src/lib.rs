//! # testlib-events
//!
//! Domain event names and the in-process event bus.
//!
//! ## Design Principles
//!
//! - Handlers are registered explicitly during startup wiring, never discovered
//! - Delivery is synchronous and follows registration order
//! - Handlers never publish re-entrantly; they push follow-up events into the
//!   context, and the bus drains them in FIFO order within the same `publish`
//!
//! ## Event Names
//!
//! Canonical events are `job.*` and `resource.*` (see [`event_types`]). In
//! addition every job type publishes an event named after the type itself
//! (e.g. `SCAN`, `EXPORT_ADD_ISCSI`) once a job of that type is done, so
//! type-specific reactors can subscribe narrowly.

mod bus;
mod error;
mod types;

pub use bus::*;
pub use error::{EventError, HandlerError};
pub use types::*;
