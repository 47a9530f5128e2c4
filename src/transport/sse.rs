//! Server-push transport.
//!
//! # Responsibilities
//! - Open the `<base>/sse` event stream and decode its frames
//! - Surface `init` frames distinctly; let `keepalive` frames and comment
//!   lines refresh activity without producing a message
//! - Send outbound calls as POSTs to `<base>`
//!
//! # Data Flow
//! ```text
//! GET <base>/sse ──bytes──→ SseDecoder ──SseItem──→ dispatch
//!                                                    ├─ init      → Init event
//!                                                    ├─ keepalive → touch
//!                                                    └─ other     → Message event
//! send / send_batch ──→ HttpExchange (POST <base>)
//! ```
//!
//! # Design Decisions
//! - `connect` resolves once the stream answers 2xx, fails on anything else
//! - After that, a dropped stream moves to `reconnecting` and is re-opened
//!   the way a browser event source does: after the server's `retry:` delay,
//!   resending the last event id
//! - One background task owns the stream; `disconnect` cancels it

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use url::Url;

use crate::config::TransportConfig;
use crate::observability::metrics;
use crate::protocol::endpoint::{parse_endpoint, rpc_url, sse_url};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::resilience::{Scheduler, TaskSlot};
use crate::transport::core::TransportCore;
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::events::{EventHandler, IncomingMessage, Subscription, TransportEvent};
use crate::transport::http::HttpExchange;
use crate::transport::model::{ConnectionInfo, ConnectionState, TransportKind};
use crate::transport::Transport;

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// One dispatched event-stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream did not name it.
    pub name: String,
    pub data: String,
    pub id: Option<String>,
}

/// Output of [`SseDecoder::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
    Event(SseEvent),
    /// `:` line, used by servers as a keepalive.
    Comment(String),
    /// Reconnection delay requested by the server, in milliseconds.
    Retry(u64),
}

/// Incremental `text/event-stream` decoder.
///
/// Accepts arbitrary chunk boundaries, including a `\r\n` split in two.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    skip_lf: bool,
    event: Option<String>,
    data: String,
    last_event_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        let mut out = Vec::new();
        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' => {
                    self.skip_lf = true;
                    self.end_line(&mut out);
                }
                b'\n' => self.end_line(&mut out),
                _ => self.line.push(byte),
            }
        }
        out
    }

    fn end_line(&mut self, out: &mut Vec<SseItem>) {
        let raw = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw);

        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if let Some(comment) = line.strip_prefix(':') {
            out.push(SseItem::Comment(comment.trim_start().to_string()));
            return;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (&line[..], ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    out.push(SseItem::Retry(ms));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseItem>) {
        let name = self.event.take().filter(|n| !n.is_empty());
        if self.data.is_empty() {
            return;
        }
        let mut data = std::mem::take(&mut self.data);
        data.pop();
        out.push(SseItem::Event(SseEvent {
            name: name.unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_event_id.clone(),
        }));
    }
}

struct SseInner {
    core: TransportCore,
    exchange: HttpExchange,
    scheduler: Scheduler,
    stream_task: TaskSlot,
    base: ArcSwapOption<Url>,
    default_retry: Duration,
    /// Bumped by every connect and disconnect; an open that finishes under
    /// an older value is discarded.
    generation: Mutex<u64>,
}

/// Push transport: event stream in, POSTs out.
pub struct SseTransport {
    inner: Arc<SseInner>,
}

impl SseTransport {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        Ok(Self {
            inner: Arc::new(SseInner {
                core: TransportCore::new(TransportKind::Sse),
                exchange: HttpExchange::new(config)?,
                scheduler: Scheduler::from_current()?,
                stream_task: TaskSlot::new(),
                base: ArcSwapOption::empty(),
                default_retry: Duration::from_millis(config.sse_retry_ms),
                generation: Mutex::new(0),
            }),
        })
    }

    fn target(&self) -> TransportResult<Arc<Url>> {
        let reachable = matches!(
            self.inner.core.state(),
            ConnectionState::Connected | ConnectionState::Reconnecting
        );
        match self.inner.base.load_full() {
            Some(base) if reachable => Ok(base),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn observe<T>(&self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(e) = &result {
            tracing::warn!(transport = "sse", error = %e, "Request failed");
            self.inner.core.record_failure(e);
        }
        result
    }

    /// Stop the stream and invalidate any open still in flight.
    /// Returns the new generation.
    fn shutdown(&self) -> u64 {
        let generation = {
            let mut generation = self.inner.generation();
            *generation += 1;
            *generation
        };
        self.inner.stream_task.cancel();
        self.inner.exchange.cancel_in_flight();
        self.inner.base.store(None);
        generation
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SseInner {
    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self, url: &Url, last_event_id: Option<&str>) -> TransportResult<reqwest::Response> {
        let mut request = self
            .exchange
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID, id);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connection(format!(
                "event stream {} returned {}",
                url, status
            )));
        }
        Ok(response)
    }

    /// Own the stream until cancelled, re-opening it whenever it ends.
    async fn run(self: Arc<Self>, url: Url, response: reqwest::Response) {
        let mut decoder = SseDecoder::new();
        let mut retry = self.default_retry;
        let mut response = response;

        loop {
            let reason = self.consume(response, &mut decoder, &mut retry).await;
            tracing::warn!(transport = "sse", reason = %reason, "Event stream lost, reconnecting");
            self.core.set_state(ConnectionState::Reconnecting);
            self.core.record_failure(&TransportError::ConnectionClosed(reason));

            response = loop {
                tokio::time::sleep(retry).await;
                metrics::record_reconnect(TransportKind::Sse.as_str());
                let last_id = decoder.last_event_id().map(str::to_string);
                let opened = tokio::time::timeout(
                    self.exchange.connect_timeout(),
                    self.open(&url, last_id.as_deref()),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Connection("event stream open timed out".to_string()))
                });
                match opened {
                    Ok(response) => break response,
                    Err(e) => {
                        tracing::debug!(transport = "sse", error = %e, "Event stream re-open failed");
                        self.core.record_failure(&e);
                    }
                }
            };

            decoder = SseDecoder {
                last_event_id: decoder.last_event_id.take(),
                ..SseDecoder::default()
            };
            tracing::info!(transport = "sse", "Event stream re-opened");
            self.core.set_state(ConnectionState::Connected);
        }
    }

    /// Read `response` to its end. Returns why it ended.
    async fn consume(
        &self,
        response: reqwest::Response,
        decoder: &mut SseDecoder,
        retry: &mut Duration,
    ) -> String {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return e.to_string(),
            };
            self.core.add_bytes_received(chunk.len());
            for item in decoder.feed(&chunk) {
                match item {
                    SseItem::Event(event) => self.dispatch(event),
                    SseItem::Comment(_) => self.core.touch(),
                    SseItem::Retry(ms) => *retry = Duration::from_millis(ms),
                }
            }
        }
        "stream ended by server".to_string()
    }

    fn dispatch(&self, event: SseEvent) {
        match event.name.as_str() {
            "init" => {
                tracing::debug!(transport = "sse", "Init frame received");
                self.core
                    .emit(TransportEvent::Init(IncomingMessage::from_text(&event.data)));
            }
            "keepalive" => self.core.touch(),
            _ => self
                .core
                .emit(TransportEvent::Message(IncomingMessage::from_text(&event.data))),
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.inner.core.snapshot()
    }

    async fn connect(&self, endpoint: &str) -> TransportResult<()> {
        let base = self.observe(parse_endpoint(endpoint))?;
        let generation = self.shutdown();
        let inner = &self.inner;
        inner.core.set_state(ConnectionState::Connecting);

        let url = sse_url(&base);
        let opened = tokio::time::timeout(inner.exchange.connect_timeout(), inner.open(&url, None))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Connection(format!("timed out opening {}", url)))
            });

        let current = inner.generation();
        if *current != generation {
            tracing::debug!(transport = "sse", endpoint = %url, "Superseded open discarded");
            return Err(TransportError::ConnectionClosed(
                "connection superseded".to_string(),
            ));
        }
        match opened {
            Ok(response) => {
                tracing::info!(transport = "sse", endpoint = %url, "Event stream open");
                inner.base.store(Some(Arc::new(rpc_url(&base))));
                inner.core.mark_connected(url.as_str());
                let task = Arc::clone(inner).run(url, response);
                inner.stream_task.replace(inner.scheduler.spawn(task));
                Ok(())
            }
            Err(e) => {
                drop(current);
                tracing::error!(transport = "sse", endpoint = %url, error = %e, "Connect failed");
                inner.core.set_state(ConnectionState::Error);
                inner.core.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.shutdown();
        self.inner.core.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> TransportResult<JsonRpcResponse> {
        let result = match self.target() {
            Ok(url) => self.inner.exchange.send(&self.inner.core, &url, &request).await,
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    async fn send_batch(
        &self,
        requests: Vec<JsonRpcRequest>,
    ) -> TransportResult<Vec<JsonRpcResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let result = match self.target() {
            Ok(url) => {
                self.inner
                    .exchange
                    .send_batch(&self.inner.core, &url, &requests)
                    .await
            }
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    fn on(&self, handler: EventHandler) -> Subscription {
        self.inner.core.subscribe(handler)
    }

    fn is_connected(&self) -> bool {
        self.inner.core.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(items: Vec<SseItem>) -> Vec<SseEvent> {
        items
            .into_iter()
            .filter_map(|item| match item {
                SseItem::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn decodes_named_and_default_events() {
        let mut decoder = SseDecoder::new();
        let out = events(decoder.feed(
            b"event: init\ndata: {\"clientId\":\"abc\"}\n\ndata: {\"a\":1}\n\n",
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "init");
        assert_eq!(out[0].data, r#"{"clientId":"abc"}"#);
        assert_eq!(out[1].name, "message");
    }

    #[test]
    fn handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: par").is_empty());
        assert!(decoder.feed(b"t one\r").is_empty());
        assert!(decoder.feed(b"\ndata: part two\r\n").is_empty());
        let out = events(decoder.feed(b"\r\n"));
        assert_eq!(out[0].data, "part one\npart two");
    }

    #[test]
    fn comments_retry_and_ids() {
        let mut decoder = SseDecoder::new();
        let items = decoder.feed(b": keepalive\nretry: 1500\nid: 7\nevent: keepalive\ndata: \n\n");
        assert_eq!(items[0], SseItem::Comment("keepalive".to_string()));
        assert_eq!(items[1], SseItem::Retry(1500));
        assert_eq!(decoder.last_event_id(), Some("7"));
        assert!(matches!(&items[2], SseItem::Event(e) if e.name == "keepalive" && e.id.as_deref() == Some("7")));
    }

    #[test]
    fn event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: init\n\n").is_empty());
        let out = events(decoder.feed(b"data: x\n\n"));
        assert_eq!(out[0].name, "message");
    }

    #[tokio::test]
    async fn invalid_endpoint_is_counted_and_broadcast() {
        let transport = SseTransport::new(&TransportConfig::default()).unwrap();
        let errors = Arc::new(Mutex::new(0));
        let e = errors.clone();
        let _sub = transport.on(Arc::new(move |event: &TransportEvent| {
            if matches!(event, TransportEvent::Error(_)) {
                *e.lock().unwrap() += 1;
            }
        }));

        let err = transport.connect("not a url").await.unwrap_err();

        assert!(matches!(err, TransportError::InvalidEndpoint(_)));
        assert_eq!(transport.connection_info().metrics.error_count, 1);
        assert_eq!(*errors.lock().unwrap(), 1);
    }
}
