//! Error types for event handling.

use thiserror::Error;

/// Boxed error returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when delivering events.
#[derive(Debug, Error)]
pub enum EventError {
    /// A handler failed; delivery stopped at that handler.
    #[error("handler for '{event}' failed: {source}")]
    Handler {
        event: String,
        #[source]
        source: HandlerError,
    },
}

impl EventError {
    /// Returns the name of the event whose handler failed.
    pub fn event(&self) -> &str {
        match self {
            EventError::Handler { event, .. } => event,
        }
    }

    /// Returns the handler's own error.
    pub fn handler_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            EventError::Handler { source, .. } => source.as_ref(),
        }
    }
}
