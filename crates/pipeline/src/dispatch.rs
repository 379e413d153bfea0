//! Routes named events from a joined channel to registered handlers.
//!
//! Handlers receive the mutable context they operate on (for pipeline topics,
//! the [`PipelineStateMachine`]) plus the payload exactly as received.
//!
//! The transport delivers at least once and the dispatcher does not
//! deduplicate, so handlers must tolerate seeing the same logical event more
//! than once. A handler that panics is a bug in the handler; the dispatcher
//! does not catch it.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{trace, warn};

use crate::events::{names, PipelineEvent};
use crate::machine::PipelineStateMachine;

/// A registered event handler.
pub type Handler<C> = Box<dyn Fn(&mut C, &Value) + Send + Sync>;

/// Result of a single [`EventDispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler was registered for the event and has run.
    Handled,
    /// No handler is registered for the event name.
    Ignored,
}

/// Mapping from event name to handler.
pub struct EventDispatcher<C> {
    handlers: BTreeMap<String, Handler<C>>,
}

impl<C> EventDispatcher<C> {
    /// Creates a dispatcher with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registers `handler` for `event`, replacing any previous one. Builder form.
    #[must_use]
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut C, &Value) + Send + Sync + 'static,
    {
        self.register(event, handler);
        self
    }

    /// Registers `handler` for `event`, replacing any previous one.
    pub fn register<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(&mut C, &Value) + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Box::new(handler));
    }

    /// Invokes the handler registered for `event`, if any.
    ///
    /// Unknown names are ignored silently so that publishers can add new
    /// event types without breaking existing subscribers.
    pub fn dispatch(&self, ctx: &mut C, event: &str, payload: &Value) -> DispatchOutcome {
        match self.handlers.get(event) {
            Some(handler) => {
                handler(ctx, payload);
                DispatchOutcome::Handled
            }
            None => {
                trace!(event, "No handler registered");
                DispatchOutcome::Ignored
            }
        }
    }

    /// Names of all events with a registered handler, sorted.
    pub fn event_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Returns `true` if a handler is registered for `event`.
    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }
}

impl<C> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for EventDispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventDispatcher<PipelineStateMachine> {
    /// Dispatcher wiring every known pipeline and reconciliation event into a
    /// [`PipelineStateMachine`].
    ///
    /// Payloads are validated into [`PipelineEvent`] before they reach the
    /// machine. A payload that fails validation is logged and counted as a
    /// received event but changes no state.
    pub fn pipeline() -> Self {
        let mut dispatcher = Self::new();
        for &name in names::ALL {
            dispatcher.register(name, move |machine: &mut PipelineStateMachine, payload| {
                match PipelineEvent::decode(name, payload) {
                    Ok(event) => machine.apply(event),
                    Err(err) => {
                        warn!(event = name, error = %err, "Dropping malformed payload");
                        machine.record_malformed(name);
                    }
                }
            });
        }
        dispatcher
    }
}
