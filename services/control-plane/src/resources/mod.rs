//! Resource inventory: model, repository, and creation checks.

pub mod model;
mod repository;
pub mod validation;

pub use model::*;
pub use repository::{ResourceEvent, RepositoryError, ResourceRepository};
pub use validation::ValidationError;

pub(crate) use repository::now_ms;
