//! Live trace feed client.
//!
//! # Responsibilities
//! - Hold one socket to the trace feed and keep it alive
//! - Classify every close: clean, retryable network, or fatal authentication
//! - Keep the most recent events in a ring buffer, newest first on read
//! - Publish status through a watch channel; never return errors to callers
//!
//! # State Transitions
//! ```text
//! disconnected → connecting → connected
//! connected ──network close──→ reconnecting ──backoff──→ connecting
//! reconnecting ──5th failure──→ failed ──cooldown──→ trial connect
//! any ──auth close / 401 / 403──→ failed (until reset)
//! connected ──1000/1001──→ disconnected
//! ```
//!
//! # Design Decisions
//! - The breaker and backoff state here are independent of any transport
//! - A successful connection closes the breaker, resets the backoff and
//!   flushes events held while paused
//! - Each connection carries a generation; callbacks from a superseded
//!   connection are ignored

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::RealtimeConfig;
use crate::observability::metrics;
use crate::protocol::endpoint::{feed_url, redacted};
use crate::realtime::event::{FeedFrame, TraceEvent};
use crate::realtime::ring_buffer::RingBuffer;
use crate::resilience::{compute_backoff, BreakerState, CircuitBreaker, Scheduler, TaskSlot};
use crate::transport::error::{TransportError, TransportResult};

/// Shown once an authentication failure has stopped retries.
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed — check API key";

/// Shown once network failures have opened the breaker.
pub const MAX_ATTEMPTS_MESSAGE: &str = "Max reconnection attempts reached";

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Externally visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedStatus::Disconnected => "disconnected",
            FeedStatus::Connecting => "connecting",
            FeedStatus::Connected => "connected",
            FeedStatus::Reconnecting => "reconnecting",
            FeedStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Category of a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retried with backoff.
    Network,
    /// Never retried.
    Auth,
}

impl FailureKind {
    /// Authentication errors are fatal; everything else is retried.
    pub fn of(error: &TransportError) -> Self {
        match error {
            TransportError::Auth(_) => FailureKind::Auth,
            _ => FailureKind::Network,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Auth => "auth",
        }
    }
}

/// Classify a close code. `None` means a clean close that is not a failure.
pub fn classify_close(code: Option<u16>) -> Option<FailureKind> {
    match code {
        Some(1000) | Some(1001) => None,
        Some(1008) | Some(4001) | Some(4003) => Some(FailureKind::Auth),
        _ => Some(FailureKind::Network),
    }
}

/// Observable state of the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub status: FeedStatus,
    /// User-facing message once retries have stopped.
    pub error: Option<String>,
    /// Detail of the most recent failed or skipped attempt.
    pub last_failure: Option<String>,
    pub failure_count: u32,
    pub breaker: BreakerState,
    /// Events in the ring buffer.
    pub buffered: usize,
    /// Events held back while paused.
    pub pending: usize,
    pub paused: bool,
    pub total_events: u64,
}

struct FeedState {
    breaker: CircuitBreaker,
    ring: RingBuffer<TraceEvent>,
    pending: RingBuffer<TraceEvent>,
    attempt: u32,
    auth_failed: bool,
    paused: bool,
    wanted: bool,
    generation: u64,
    status: FeedStatus,
    error: Option<String>,
    last_failure: Option<String>,
    total_events: u64,
    closer: Option<oneshot::Sender<()>>,
}

impl FeedState {
    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            status: self.status,
            error: self.error.clone(),
            last_failure: self.last_failure.clone(),
            failure_count: self.breaker.failure_count(),
            breaker: self.breaker.state(),
            buffered: self.ring.len(),
            pending: self.pending.len(),
            paused: self.paused,
            total_events: self.total_events,
        }
    }

    fn flush_pending(&mut self) {
        for event in self.pending.drain() {
            self.ring.push(event);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.wanted && self.generation == generation
    }
}

struct FeedInner {
    url: Url,
    config: RealtimeConfig,
    scheduler: Scheduler,
    state: Mutex<FeedState>,
    snapshot: watch::Sender<FeedSnapshot>,
    session_task: TaskSlot,
    retry_task: TaskSlot,
}

/// Resilient consumer of the live trace feed.
pub struct LiveFeedClient {
    inner: Arc<FeedInner>,
}

impl LiveFeedClient {
    /// Must be called inside a tokio runtime.
    pub fn new(config: RealtimeConfig) -> TransportResult<Self> {
        let url = feed_url(&config.url, config.api_key.as_deref())?;
        let state = FeedState {
            breaker: CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_millis(config.cooldown_ms),
            ),
            ring: RingBuffer::new(config.buffer_capacity),
            pending: RingBuffer::new(config.buffer_capacity),
            attempt: 0,
            auth_failed: false,
            paused: false,
            wanted: false,
            generation: 0,
            status: FeedStatus::Disconnected,
            error: None,
            last_failure: None,
            total_events: 0,
            closer: None,
        };
        let (snapshot, _) = watch::channel(state.snapshot());
        Ok(Self {
            inner: Arc::new(FeedInner {
                url,
                config,
                scheduler: Scheduler::from_current()?,
                state: Mutex::new(state),
                snapshot,
                session_task: TaskSlot::new(),
                retry_task: TaskSlot::new(),
            }),
        })
    }

    /// Start (or restart) consuming the feed.
    ///
    /// Returns once the first attempt has either connected or failed; the
    /// outcome is visible in [`snapshot`](Self::snapshot).
    pub async fn connect(&self) {
        self.inner.retry_task.cancel();
        let generation = {
            let mut state = self.inner.lock();
            state.wanted = true;
            state.generation += 1;
            if let Some(closer) = state.closer.take() {
                let _ = closer.send(());
            }
            state.generation
        };
        Arc::clone(&self.inner).attempt(generation).await;
    }

    /// Stop consuming and cancel any scheduled reconnect.
    pub fn disconnect(&self) {
        self.inner.retry_task.cancel();
        let mut state = self.inner.lock();
        let was_wanted = state.wanted;
        state.wanted = false;
        state.generation += 1;
        if let Some(closer) = state.closer.take() {
            let _ = closer.send(());
        }
        if !state.auth_failed {
            state.status = FeedStatus::Disconnected;
        }
        self.inner.publish(&state);
        if was_wanted {
            tracing::info!(url = %redacted(&self.inner.url), "Live feed disconnected");
        }
    }

    /// Hold new events back from the ring until [`resume`](Self::resume).
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        state.paused = true;
        self.inner.publish(&state);
    }

    /// Flush held events into the ring and resume live updates.
    pub fn resume(&self) {
        let mut state = self.inner.lock();
        state.paused = false;
        state.flush_pending();
        self.inner.publish(&state);
    }

    /// Drop every buffered and held event.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.ring.clear();
        state.pending.clear();
        self.inner.publish(&state);
    }

    /// Forget an authentication failure and close the breaker.
    ///
    /// Does not reconnect; call [`connect`](Self::connect) afterwards.
    pub fn reset(&self) {
        self.inner.retry_task.cancel();
        let mut state = self.inner.lock();
        state.auth_failed = false;
        state.breaker.record_success();
        state.attempt = 0;
        state.error = None;
        state.last_failure = None;
        if state.status == FeedStatus::Failed {
            state.status = FeedStatus::Disconnected;
        }
        self.inner.publish(&state);
    }

    /// Buffered events, most recent first.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.inner.lock().ring.newest_first()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver notified on every status or buffer change.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.inner.snapshot.subscribe()
    }
}

impl Drop for LiveFeedClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl FeedInner {
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &FeedState) {
        self.snapshot.send_replace(state.snapshot());
    }

    async fn attempt(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.lock();
            if !state.is_current(generation) || state.auth_failed {
                return;
            }
            let gate = match state.breaker.try_acquire(Instant::now()) {
                // The trial of a superseded connection never reported back.
                Err(_) if state.breaker.state() == BreakerState::HalfOpen => Ok(()),
                other => other,
            };
            if let Err(remaining) = gate {
                let skipped = TransportError::CircuitOpen {
                    retry_in_ms: remaining.as_millis() as u64,
                };
                tracing::debug!(error = %skipped, "Connection attempt skipped");
                state.status = FeedStatus::Failed;
                state.last_failure = Some(skipped.to_string());
                self.publish(&state);
                drop(state);
                self.schedule_attempt(remaining, generation);
                return;
            }
            state.status = if state.attempt == 0 {
                FeedStatus::Connecting
            } else {
                FeedStatus::Reconnecting
            };
            self.publish(&state);
        }

        tracing::debug!(url = %redacted(&self.url), "Connecting to live feed");
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _response))) => self.on_open(ws, generation),
            Ok(Err(WsError::Http(response))) if matches!(response.status().as_u16(), 401 | 403) => {
                let error = TransportError::Auth(format!("handshake rejected with {}", response.status()));
                self.on_failure(generation, error);
            }
            Ok(Err(e)) => self.on_failure(generation, TransportError::from(e)),
            Err(_) => self.on_failure(
                generation,
                TransportError::Connection(format!("timed out connecting to {}", redacted(&self.url))),
            ),
        }
    }

    fn on_open(self: &Arc<Self>, ws: FeedStream, generation: u64) {
        let (closer, closed) = oneshot::channel();
        {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            state.breaker.record_success();
            state.attempt = 0;
            state.status = FeedStatus::Connected;
            state.error = None;
            state.last_failure = None;
            state.closer = Some(closer);
            state.flush_pending();
            self.publish(&state);
        }
        tracing::info!(url = %redacted(&self.url), "Live feed connected");

        let task = Arc::clone(self).run_session(ws, closed, generation);
        self.session_task.replace(self.scheduler.spawn(task));
    }

    async fn run_session(self: Arc<Self>, ws: FeedStream, mut closed: oneshot::Receiver<()>, generation: u64) {
        let (mut sink, mut stream) = ws.split();

        let (code, reason) = loop {
            tokio::select! {
                _ = &mut closed => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        })))
                        .await;
                    return;
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            break (None, e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                            None => (None, "closed without status".to_string()),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break (None, e.to_string()),
                    None => break (None, "connection dropped".to_string()),
                },
            }
        };

        match classify_close(code) {
            None => {
                let mut state = self.lock();
                if state.is_current(generation) {
                    tracing::info!(code = ?code, "Live feed closed cleanly");
                    state.closer = None;
                    state.status = FeedStatus::Disconnected;
                    self.publish(&state);
                }
            }
            Some(FailureKind::Auth) => {
                let code = code.unwrap_or_default();
                self.on_failure(generation, TransportError::Auth(format!("closed with code {}: {}", code, reason)))
            }
            Some(FailureKind::Network) => {
                self.on_failure(generation, TransportError::ConnectionClosed(reason))
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let event = match FeedFrame::parse(text) {
            Ok(FeedFrame::Connected) => {
                tracing::debug!("Live feed acknowledged subscription");
                return;
            }
            Ok(FeedFrame::Event(event)) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unrecognised feed frame");
                return;
            }
        };

        let mut state = self.lock();
        state.total_events += 1;
        if state.paused {
            state.pending.push(event);
        } else {
            state.ring.push(event);
        }
        metrics::record_feed_event(state.ring.len());
        self.publish(&state);
    }

    fn on_failure(self: &Arc<Self>, generation: u64, error: TransportError) {
        let now = Instant::now();
        let kind = FailureKind::of(&error);
        let mut state = self.lock();
        if !state.is_current(generation) {
            return;
        }
        state.closer = None;
        state.last_failure = Some(error.to_string());
        metrics::record_feed_failure(kind.as_str());

        match kind {
            FailureKind::Auth => {
                state.breaker.trip(now);
                state.auth_failed = true;
                state.status = FeedStatus::Failed;
                state.error = Some(AUTH_FAILED_MESSAGE.to_string());
                self.publish(&state);
                drop(state);
                self.retry_task.cancel();
                tracing::error!(error = %error, "Live feed authentication failed, not retrying");
            }
            FailureKind::Network => {
                let delay = if state.breaker.record_failure(now) == BreakerState::Open {
                    state.status = FeedStatus::Failed;
                    state.error = Some(MAX_ATTEMPTS_MESSAGE.to_string());
                    state.breaker.remaining_cooldown(now)
                } else {
                    let delay = compute_backoff(state.attempt, &self.config.backoff);
                    state.attempt = state.attempt.saturating_add(1);
                    state.status = FeedStatus::Reconnecting;
                    delay
                };
                let failures = state.breaker.failure_count();
                self.publish(&state);
                drop(state);
                tracing::warn!(
                    error = %error,
                    failures = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Live feed connection failed, retrying"
                );
                self.schedule_attempt(delay, generation);
            }
        }
    }

    fn schedule_attempt(self: &Arc<Self>, delay: Duration, generation: u64) {
        let inner = Arc::clone(self);
        let handle = self.scheduler.schedule(delay, inner.attempt(generation));
        self.retry_task.hand_over(handle);
    }
}
