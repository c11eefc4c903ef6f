//! Synchronous, registration-ordered event bus.

use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::{Event, EventError, HandlerError};

/// Context that can hold events raised while handling other events.
///
/// Repositories and handlers push follow-up events into the context instead of
/// publishing them directly; the bus drains them after every handler call.
pub trait EventSource<E> {
    /// Removes and returns every pending event, oldest first.
    fn drain_events(&mut self) -> Vec<E>;
}

/// A registered handler.
pub type Handler<C, E> = Box<dyn Fn(&mut C, &E) -> Result<(), HandlerError> + Send + Sync>;

/// Registry mapping event names to ordered handler lists.
///
/// `C` is the mutable context handed to every handler (the owner of the
/// repositories), `E` the event type.
pub struct EventBus<C, E> {
    handlers: HashMap<String, Vec<Handler<C, E>>>,
}

impl<C, E> Default for EventBus<C, E> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C, E> EventBus<C, E>
where
    E: Event,
    C: EventSource<E>,
{
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `name`. Handlers run in registration order.
    pub fn on<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut C, &E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Returns how many handlers are registered for `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }

    /// Publishes `event`, then keeps delivering whatever the handlers raise
    /// until the context has nothing pending.
    ///
    /// Events already pending in the context are delivered before `event`.
    /// Returns the number of events delivered.
    pub fn publish(&self, ctx: &mut C, event: E) -> Result<usize, EventError> {
        let mut queue: VecDeque<E> = ctx.drain_events().into();
        queue.push_back(event);
        self.deliver(ctx, queue)
    }

    /// Delivers events that are pending in the context.
    pub fn flush(&self, ctx: &mut C) -> Result<usize, EventError> {
        let queue: VecDeque<E> = ctx.drain_events().into();
        self.deliver(ctx, queue)
    }

    fn deliver(&self, ctx: &mut C, mut queue: VecDeque<E>) -> Result<usize, EventError> {
        let mut delivered = 0;

        while let Some(event) = queue.pop_front() {
            let name = event.name();
            let handlers = self.handlers.get(name).map(Vec::as_slice).unwrap_or(&[]);
            trace!(event = name, handlers = handlers.len(), "delivering event");

            for handler in handlers {
                handler(ctx, &event).map_err(|source| EventError::Handler {
                    event: name.to_string(),
                    source,
                })?;
                queue.extend(ctx.drain_events());
            }

            delivered += 1;
        }

        Ok(delivered)
    }
}
