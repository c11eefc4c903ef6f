//! testlib control plane library.
//!
//! This crate primarily ships a `testlib-control-plane` binary, but we expose
//! a small library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod reactors;
pub mod reconciler;
pub mod resources;
pub mod state;

pub use domain::{ControlEvent, Domain};
pub use error::ControlError;
pub use reactors::{build_bus, ControlBus};
pub use state::AppState;
