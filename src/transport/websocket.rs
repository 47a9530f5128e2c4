//! Full-duplex transport.
//!
//! # Responsibilities
//! - Hold one persistent socket at `<base>/ws`
//! - Correlate concurrent requests with their responses by id
//! - Reconnect with exponential backoff after an unexpected close
//!
//! # Data Flow
//! ```text
//! send(req) → pending[id] = oneshot → outbound queue → writer half ──→ server
//! server ──→ reader half → frame (object | array)
//!                              ├─ has "method"   → Message event
//!                              ├─ id pending     → complete oneshot
//!                              └─ id unknown     → dropped
//! close (not 1000) → reject pending → backoff → reconnect
//! ```
//!
//! # Design Decisions
//! - One task owns both socket halves and serialises every write
//! - Each connection carries a generation number; a task whose generation
//!   has been superseded by `connect`/`disconnect` exits without side effects
//! - `send_batch` fans out independent sends; results stay in request order

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::TransportConfig;
use crate::observability::metrics;
use crate::protocol::endpoint::{parse_endpoint, ws_url};
use crate::protocol::envelope::TRANSPORT_ERROR;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::resilience::{compute_backoff, BackoffConfig, Scheduler, TaskSlot};
use crate::transport::core::TransportCore;
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::events::{EventHandler, IncomingMessage, Subscription, TransportEvent};
use crate::transport::http::API_KEY_HEADER;
use crate::transport::model::{ConnectionInfo, ConnectionState, TransportKind};
use crate::transport::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct PendingRequest {
    tx: oneshot::Sender<TransportResult<JsonRpcResponse>>,
    sent_at: Instant,
    /// Distinguishes a reused id from the entry that was registered first.
    seq: u64,
}

/// Removes its pending entry if the waiting future goes away first.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, PendingRequest>,
    id: RequestId,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove_if(&self.id, |_, entry| entry.seq == self.seq);
    }
}

#[derive(Default)]
struct Session {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    generation: u64,
    /// False once the caller disconnected; nothing may reopen the socket.
    wanted: bool,
}

enum Closed {
    /// Outbound queue dropped by `connect` or `disconnect`.
    Local,
    Remote(Option<CloseFrame>),
    Failed(String),
}

struct WsInner {
    core: TransportCore,
    scheduler: Scheduler,
    request_timeout: Duration,
    connect_timeout: Duration,
    backoff: BackoffConfig,
    auto_reconnect: bool,
    api_key: Option<String>,
    pending: DashMap<RequestId, PendingRequest>,
    session: Mutex<Session>,
    endpoint: Mutex<Option<Url>>,
    io_task: TaskSlot,
    reconnect_task: TaskSlot,
    reconnect_attempt: AtomicU32,
    next_id: AtomicI64,
    next_seq: AtomicU64,
}

/// Persistent socket transport with id correlation.
pub struct WebSocketTransport {
    inner: Arc<WsInner>,
}

impl WebSocketTransport {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        Ok(Self {
            inner: Arc::new(WsInner {
                core: TransportCore::new(TransportKind::WebSocket),
                scheduler: Scheduler::from_current()?,
                request_timeout: Duration::from_millis(config.request_timeout_ms),
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                backoff: config.backoff.clone(),
                auto_reconnect: config.auto_reconnect,
                api_key: config.api_key.clone().filter(|k| !k.is_empty()),
                pending: DashMap::new(),
                session: Mutex::new(Session::default()),
                endpoint: Mutex::new(None),
                io_task: TaskSlot::new(),
                reconnect_task: TaskSlot::new(),
                reconnect_attempt: AtomicU32::new(0),
                next_id: AtomicI64::new(1),
                next_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Consecutive failed reconnects since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.reconnect_attempt.load(Ordering::SeqCst)
    }

    fn shutdown(&self, reason: &str) {
        let inner = &self.inner;
        let outbound = {
            let mut session = inner.session();
            session.wanted = false;
            session.generation += 1;
            session.outbound.take()
        };
        inner.reconnect_task.cancel();
        if let Some(outbound) = outbound {
            let _ = outbound.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            })));
        }
        inner.reject_all(reason);
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shutdown("transport dropped");
    }
}

impl WsInner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assign_id(&self, request: &mut JsonRpcRequest) -> RequestId {
        match &request.id {
            Some(id) => id.clone(),
            None => {
                let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
                request.id = Some(id.clone());
                id
            }
        }
    }

    fn write(&self, message: Message) -> TransportResult<()> {
        let session = self.session();
        let outbound = session.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        outbound
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed("socket writer stopped".to_string()))
    }

    /// Fail every outstanding request, then clear the map.
    fn reject_all(&self, reason: &str) {
        let ids: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), reason = %reason, "Rejecting pending requests");
        }
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry
                    .tx
                    .send(Err(TransportError::ConnectionClosed(reason.to_string())));
            }
        }
        self.pending.clear();
    }

    async fn send(&self, mut request: JsonRpcRequest) -> TransportResult<JsonRpcResponse> {
        if !self.core.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let id = self.assign_id(&mut request);
        let text = serde_json::to_string(&request)?;
        let bytes = text.len();

        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(TransportError::DuplicateRequestId(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    tx,
                    sent_at: Instant::now(),
                    seq,
                });
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
            seq,
        };

        self.write(Message::text(text))?;
        self.core.add_bytes_sent(bytes);

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ConnectionClosed(
                "request abandoned".to_string(),
            )),
            Err(_) => Err(TransportError::RequestTimeout {
                id,
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    /// Open the socket for `generation` and start its I/O task.
    async fn open(self: &Arc<Self>, url: &Url, generation: u64) -> TransportResult<()> {
        let mut request = url.as_str().into_client_request()?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| TransportError::Connection(format!("invalid API key header: {}", e)))?;
            request.headers_mut().insert(API_KEY_HEADER, value);
        }

        let (ws, _response) =
            match tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(TransportError::Connection(format!(
                        "timed out connecting to {}",
                        url
                    )))
                }
            };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = self.session();
        if !session.wanted || session.generation != generation {
            return Err(TransportError::ConnectionClosed(
                "connection superseded".to_string(),
            ));
        }
        session.outbound = Some(tx);
        self.reconnect_attempt.store(0, Ordering::SeqCst);
        self.core.mark_connected(url.as_str());
        let task = Arc::clone(self).run_connection(ws, rx, generation);
        self.io_task.replace(self.scheduler.spawn(task));
        Ok(())
    }

    async fn run_connection(
        self: Arc<Self>,
        ws: WsStream,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        generation: u64,
    ) {
        let (mut sink, mut stream) = ws.split();

        let closed = loop {
            tokio::select! {
                next = outbound.recv() => match next {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            break Closed::Failed(e.to_string());
                        }
                    }
                    None => break Closed::Local,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_text(text),
                        Err(_) => tracing::debug!(bytes = data.len(), "Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            break Closed::Failed(e.to_string());
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => break Closed::Remote(frame),
                    Some(Err(e)) => break Closed::Failed(e.to_string()),
                    None => break Closed::Failed("connection dropped".to_string()),
                },
            }
        };

        self.on_closed(generation, closed);
    }

    fn handle_text(&self, text: &str) {
        self.core.add_bytes_received(text.len());
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items.into_iter().for_each(|item| self.handle_value(item)),
            Ok(value) => self.handle_value(value),
            Err(_) => {
                tracing::debug!(bytes = text.len(), "Unparsable frame surfaced as raw message");
                self.core
                    .emit(TransportEvent::Message(IncomingMessage::Raw(text.to_string())));
            }
        }
    }

    fn handle_value(&self, value: Value) {
        if value.get("method").is_some() {
            self.core
                .emit(TransportEvent::Message(IncomingMessage::Json(value)));
            return;
        }
        let response: JsonRpcResponse = match serde_json::from_value(value.clone()) {
            Ok(response) => response,
            Err(_) => {
                self.core
                    .emit(TransportEvent::Message(IncomingMessage::Json(value)));
                return;
            }
        };
        let Some(id) = response.id.clone() else {
            self.core
                .emit(TransportEvent::Message(IncomingMessage::Json(value)));
            return;
        };
        match self.pending.remove(&id) {
            Some((_, entry)) => {
                self.core.complete_exchange(entry.sent_at.elapsed());
                let _ = entry.tx.send(Ok(response));
            }
            None => tracing::debug!(id = %id, "Dropping response for unknown request id"),
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, closed: Closed) {
        {
            let mut session = self.session();
            if session.generation != generation {
                return;
            }
            session.outbound = None;
        }

        let reason = match closed {
            Closed::Local => return,
            Closed::Remote(Some(frame)) if frame.code == CloseCode::Normal => {
                tracing::info!(transport = "websocket", "Server closed the connection");
                self.reject_all("server closed the connection");
                self.core.set_state(ConnectionState::Disconnected);
                return;
            }
            Closed::Remote(Some(frame)) => {
                format!("closed with code {}: {}", u16::from(frame.code), frame.reason.as_str())
            }
            Closed::Remote(None) => "closed without status".to_string(),
            Closed::Failed(reason) => reason,
        };

        tracing::warn!(transport = "websocket", reason = %reason, "Connection lost");
        self.reject_all(&reason);
        self.core
            .record_failure(&TransportError::ConnectionClosed(reason));

        if self.auto_reconnect {
            self.schedule_reconnect(generation);
        } else {
            self.core.set_state(ConnectionState::Disconnected);
        }
    }

    /// Schedule the next open for `generation` unless it was superseded.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let session = self.session();
        if !session.wanted || session.generation != generation {
            return;
        }
        let attempt = self.reconnect_attempt.fetch_add(1, Ordering::SeqCst);
        let delay = compute_backoff(attempt, &self.backoff);
        self.core.set_state(ConnectionState::Reconnecting);
        metrics::record_reconnect(TransportKind::WebSocket.as_str());
        tracing::info!(
            transport = "websocket",
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let inner = Arc::clone(self);
        let handle = self.scheduler.schedule(delay, async move { inner.reconnect().await });
        self.reconnect_task.hand_over(handle);
        drop(session);
    }

    async fn reconnect(self: Arc<Self>) {
        let Some(url) = self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return;
        };
        let generation = {
            let session = self.session();
            if !session.wanted {
                return;
            }
            self.core.set_state(ConnectionState::Connecting);
            session.generation
        };

        match self.open(&url, generation).await {
            Ok(()) => tracing::info!(transport = "websocket", endpoint = %url, "Reconnected"),
            Err(e) => {
                if !self.is_current(generation) {
                    tracing::debug!(transport = "websocket", error = %e, "Superseded reconnect discarded");
                    return;
                }
                tracing::warn!(transport = "websocket", error = %e, "Reconnect failed");
                self.core.record_failure(&e);
                self.schedule_reconnect(generation);
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let session = self.session();
        session.wanted && session.generation == generation
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.inner.core.snapshot()
    }

    async fn connect(&self, endpoint: &str) -> TransportResult<()> {
        let inner = &self.inner;
        let url = match parse_endpoint(endpoint) {
            Ok(base) => ws_url(&base),
            Err(e) => {
                inner.core.record_failure(&e);
                return Err(e);
            }
        };
        inner.reconnect_task.cancel();

        let (generation, previous) = {
            let mut session = inner.session();
            session.wanted = true;
            session.generation += 1;
            (session.generation, session.outbound.take())
        };
        if let Some(previous) = previous {
            let _ = previous.send(Message::Close(None));
            inner.reject_all("connection replaced");
        }
        *inner.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.clone());
        inner.reconnect_attempt.store(0, Ordering::SeqCst);
        inner.core.set_state(ConnectionState::Connecting);

        match inner.open(&url, generation).await {
            Ok(()) => {
                tracing::info!(transport = "websocket", endpoint = %url, "Connected");
                Ok(())
            }
            Err(e) => {
                let session = inner.session();
                if session.generation != generation {
                    tracing::debug!(transport = "websocket", endpoint = %url, error = %e, "Superseded connect discarded");
                    return Err(e);
                }
                tracing::error!(transport = "websocket", endpoint = %url, error = %e, "Connect failed");
                inner.core.set_state(ConnectionState::Error);
                inner.core.record_failure(&e);
                drop(session);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.shutdown("transport disconnected");
        self.inner.core.set_state(ConnectionState::Disconnected);
        tracing::info!(transport = "websocket", "Disconnected");
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> TransportResult<JsonRpcResponse> {
        let result = self.inner.send(request).await;
        if let Err(e) = &result {
            tracing::warn!(transport = "websocket", error = %e, "Request failed");
            self.inner.core.record_failure(e);
        }
        result
    }

    async fn send_batch(
        &self,
        requests: Vec<JsonRpcRequest>,
    ) -> TransportResult<Vec<JsonRpcResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if !self.inner.core.is_connected() {
            let e = TransportError::NotConnected;
            self.inner.core.record_failure(&e);
            return Err(e);
        }

        let calls = requests.into_iter().map(|mut request| {
            let id = self.inner.assign_id(&mut request);
            async move {
                match self.send(request).await {
                    Ok(response) => response,
                    Err(e) => JsonRpcResponse::failure(
                        Some(id),
                        JsonRpcError::new(TRANSPORT_ERROR, e.to_string()),
                    ),
                }
            }
        });
        Ok(join_all(calls).await)
    }

    fn on(&self, handler: EventHandler) -> Subscription {
        self.inner.core.subscribe(handler)
    }

    fn is_connected(&self) -> bool {
        self.inner.core.is_connected()
    }
}
