//! Control plane error type.

use testlib_events::EventError;
use testlib_proto::ProtoError;
use thiserror::Error;

use crate::db::StoreError;
use crate::resources::{RepositoryError, ValidationError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ControlError {
    /// True when durability was lost somewhere down the chain, including
    /// inside an event handler. The process must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            ControlError::Repository(e) => e.is_fatal(),
            ControlError::Store(e) => e.is_fatal(),
            ControlError::Event(e) => {
                let inner = e.handler_error();
                if let Some(control) = inner.downcast_ref::<ControlError>() {
                    control.is_fatal()
                } else if let Some(repo) = inner.downcast_ref::<RepositoryError>() {
                    repo.is_fatal()
                } else if let Some(store) = inner.downcast_ref::<StoreError>() {
                    store.is_fatal()
                } else {
                    false
                }
            }
            ControlError::Validation(_) | ControlError::Proto(_) | ControlError::Serialization(_) => {
                false
            }
        }
    }

    /// True for errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ControlError::Validation(_) | ControlError::Proto(_))
    }
}
