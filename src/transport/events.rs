//! Transport event subscription.
//!
//! # Responsibilities
//! - Keep the set of registered handlers for one transport instance
//! - Deliver lifecycle, message, metric and error events in order
//! - Hand back a [`Subscription`] that removes exactly one registration
//!
//! # Design Decisions
//! - Handlers are called outside the registry lock, so a handler may
//!   subscribe or unsubscribe while being called
//! - A panicking handler is logged and skipped; the rest still run

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::transport::model::{ConnectionState, TransportMetrics};

/// Payload of a pushed or unsolicited frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Json(Value),
    /// Frame that did not parse as JSON.
    Raw(String),
}

impl IncomingMessage {
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => IncomingMessage::Json(value),
            Err(_) => IncomingMessage::Raw(text.to_string()),
        }
    }
}

/// Event broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChange {
        previous: ConnectionState,
        current: ConnectionState,
    },
    /// Named `init` frame on the push channel.
    Init(IncomingMessage),
    Message(IncomingMessage),
    Metrics(TransportMetrics),
    Error(String),
}

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

type Registry = Mutex<Vec<(u64, EventHandler)>>;

/// Registered handlers of one transport.
pub struct EventBus {
    handlers: Arc<Registry>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler`.
    pub fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.handlers),
        }
    }

    /// Deliver `event` to every handler registered at the time of the call.
    pub fn emit(&self, event: &TransportEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(event = ?event, "Transport event handler panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("handlers", &self.len()).finish()
    }
}

/// Token returned by `on`; removes its handler when unsubscribed.
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the handler registered"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut handlers = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        handlers.len() != before
    }
}
