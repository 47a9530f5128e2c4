//! Per-instance connection bookkeeping shared by every transport.
//!
//! # Responsibilities
//! - Own the transport's `ConnectionInfo` and hand out copies
//! - Apply state transitions and announce them
//! - Update latency, byte and error counters and announce them
//!
//! # Design Decisions
//! - `ConnectionInfo` lives in an `ArcSwap`; writers replace it whole, so a
//!   reader never sees a half-applied update
//! - Mirrors counters into the metrics facade as a side effect

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::observability::metrics;
use crate::resilience::update_ema;
use crate::transport::error::TransportError;
use crate::transport::events::{EventBus, EventHandler, Subscription, TransportEvent};
use crate::transport::model::{now_millis, ConnectionInfo, ConnectionState, TransportKind};

/// Connection state, metrics and subscribers of one transport.
#[derive(Debug)]
pub struct TransportCore {
    kind: TransportKind,
    info: ArcSwap<ConnectionInfo>,
    events: EventBus,
}

impl TransportCore {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            info: ArcSwap::from_pointee(ConnectionInfo::new(kind)),
            events: EventBus::new(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Copy of the current connection info.
    pub fn snapshot(&self) -> ConnectionInfo {
        ConnectionInfo::clone(&self.info.load())
    }

    pub fn state(&self) -> ConnectionState {
        self.info.load().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self, handler: EventHandler) -> Subscription {
        self.events.subscribe(handler)
    }

    pub fn emit(&self, event: TransportEvent) {
        self.events.emit(&event);
    }

    /// Move to `state`, announcing the change if there was one.
    pub fn set_state(&self, state: ConnectionState) {
        let previous = self.update(|info| info.state = state).state;
        if previous != state {
            tracing::debug!(transport = %self.kind, from = %previous, to = %state, "Connection state changed");
            self.emit(TransportEvent::StateChange {
                previous,
                current: state,
            });
        }
    }

    /// Record a successful connect to `endpoint`.
    pub fn mark_connected(&self, endpoint: &str) {
        let now = now_millis();
        let endpoint = endpoint.to_string();
        self.update(|info| {
            info.endpoint = Some(endpoint.clone());
            info.client_id = Some(Uuid::new_v4().to_string());
            info.connected_at = Some(now);
            info.last_activity_at = Some(now);
        });
        self.set_state(ConnectionState::Connected);
    }

    /// Record that something arrived, without counting an exchange.
    pub fn touch(&self) {
        let now = now_millis();
        self.update(|info| info.last_activity_at = Some(now));
    }

    pub fn add_bytes_sent(&self, bytes: usize) {
        let bytes = bytes as u64;
        self.update(|info| info.metrics.bytes_sent = info.metrics.bytes_sent.saturating_add(bytes));
        metrics::record_bytes_sent(self.kind.as_str(), bytes);
    }

    pub fn add_bytes_received(&self, bytes: usize) {
        let bytes = bytes as u64;
        let now = now_millis();
        self.update(|info| {
            info.metrics.bytes_received = info.metrics.bytes_received.saturating_add(bytes);
            info.last_activity_at = Some(now);
        });
        metrics::record_bytes_received(self.kind.as_str(), bytes);
    }

    /// Count a completed exchange and fold its latency into the average.
    pub fn complete_exchange(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1_000.0;
        let next = self.update_and_get(|info| {
            let m = &mut info.metrics;
            m.ema_latency_ms = if m.request_count == 0 {
                sample
            } else {
                update_ema(m.ema_latency_ms, sample)
            };
            m.last_latency_ms = sample;
            m.request_count += 1;
        });
        metrics::record_exchange(self.kind.as_str(), latency);
        self.emit(TransportEvent::Metrics(next.metrics));
    }

    /// Count a failure and broadcast it to subscribers.
    pub fn record_failure(&self, error: &TransportError) {
        self.update(|info| info.metrics.error_count += 1);
        metrics::record_error(self.kind.as_str());
        self.emit(TransportEvent::Error(error.to_string()));
    }

    /// Apply `f` to a copy of the info and publish it. Returns the previous value.
    fn update<F>(&self, f: F) -> ConnectionInfo
    where
        F: Fn(&mut ConnectionInfo),
    {
        self.transition(f).0
    }

    /// Like `update` but returns the value that was published.
    fn update_and_get<F>(&self, f: F) -> ConnectionInfo
    where
        F: Fn(&mut ConnectionInfo),
    {
        self.transition(f).1
    }

    fn transition<F>(&self, f: F) -> (ConnectionInfo, ConnectionInfo)
    where
        F: Fn(&mut ConnectionInfo),
    {
        let mut published: Option<Arc<ConnectionInfo>> = None;
        let previous = self.info.rcu(|current| {
            let mut next = ConnectionInfo::clone(current);
            f(&mut next);
            let next = Arc::new(next);
            published = Some(Arc::clone(&next));
            next
        });
        let previous = ConnectionInfo::clone(&previous);
        let current = match published {
            Some(p) => ConnectionInfo::clone(&p),
            None => previous.clone(),
        };
        (previous, current)
    }
}
