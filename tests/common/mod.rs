//! Shared mock MCP server and trace feed for integration tests.
//!
//! Routes:
//! - `GET  /mcp/health`  status from `health_status`
//! - `POST /mcp`         echo (single or batch) unless `rpc_body` overrides it
//! - `GET  /mcp/sse`     writes `sse_chunks`, then holds the stream open
//! - `GET  /mcp/ws`      scripted JSON-RPC socket (see `mcp_ws_session`)
//! - `GET  /ws/traces`   live trace feed

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Programmable behaviour and recorded observations of the mock.
pub struct MockState {
    pub health_status: AtomicU16,
    pub rpc_status: AtomicU16,
    /// Fixed body for every POST; `None` echoes.
    pub rpc_body: Mutex<Option<String>>,
    /// Delay applied to every POST, in milliseconds.
    pub rpc_delay_ms: AtomicU64,
    pub health_hits: AtomicU32,
    pub rpc_hits: AtomicU32,
    pub last_api_key: Mutex<Option<String>>,

    pub sse_status: AtomicU16,
    /// Delay before the stream answers, in milliseconds.
    pub sse_delay_ms: AtomicU64,
    pub sse_chunks: Mutex<Vec<String>>,
    /// The first N streams end after their chunks instead of staying open.
    pub sse_drop_first: AtomicU32,
    pub sse_hits: AtomicU32,
    pub last_event_id: Mutex<Option<String>>,

    pub ws_connections: AtomicU32,

    pub feed_hits: AtomicU32,
    /// The first N handshakes are answered with 503.
    pub feed_reject_first: AtomicU32,
    pub feed_events: Mutex<Vec<String>>,
    /// Close code for each successive feed session; empty means stay open.
    pub feed_close_codes: Mutex<VecDeque<u16>>,
    pub feed_required_key: Mutex<Option<String>>,
    pub feed_last_key: Mutex<Option<String>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            health_status: AtomicU16::new(200),
            rpc_status: AtomicU16::new(200),
            rpc_body: Mutex::new(None),
            rpc_delay_ms: AtomicU64::new(0),
            health_hits: AtomicU32::new(0),
            rpc_hits: AtomicU32::new(0),
            last_api_key: Mutex::new(None),
            sse_status: AtomicU16::new(200),
            sse_delay_ms: AtomicU64::new(0),
            sse_chunks: Mutex::new(Vec::new()),
            sse_drop_first: AtomicU32::new(0),
            sse_hits: AtomicU32::new(0),
            last_event_id: Mutex::new(None),
            ws_connections: AtomicU32::new(0),
            feed_hits: AtomicU32::new(0),
            feed_reject_first: AtomicU32::new(0),
            feed_events: Mutex::new(Vec::new()),
            feed_close_codes: Mutex::new(VecDeque::new()),
            feed_required_key: Mutex::new(None),
            feed_last_key: Mutex::new(None),
        }
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/mcp", post(rpc))
            .route("/mcp/health", get(health))
            .route("/mcp/sse", get(sse))
            .route("/mcp/ws", get(mcp_ws))
            .route("/ws/traces", get(feed))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    /// Base endpoint handed to transports.
    pub fn endpoint(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn feed_url(&self) -> String {
        format!("ws://{}/ws/traces", self.addr)
    }
}

/// Accepts TCP connections and drops them at once. Returns the accept count.
pub async fn start_dropping_listener() -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicU32::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (addr, accepts)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Trace event frame as the feed sends it.
pub fn trace_event(id: &str) -> String {
    json!({
        "edge_id": id,
        "timestamp_us": 1_700_000_000_000_000u64,
        "operation": "Planning",
        "span_type": "Planning",
        "duration_ms": 12.5,
        "tokens": 120,
        "cost": 0.00024,
        "status": "success",
        "agent_id": 1,
        "session_id": 9
    })
    .to_string()
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn echo(request: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": { "method": request["method"], "params": request["params"] },
        "id": request["id"],
    })
}

async fn health(State(state): State<Arc<MockState>>) -> StatusCode {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    status(state.health_status.load(Ordering::SeqCst))
}

async fn rpc(State(state): State<Arc<MockState>>, headers: HeaderMap, body: String) -> Response {
    state.rpc_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_api_key.lock().unwrap() = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let delay = state.rpc_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let code = status(state.rpc_status.load(Ordering::SeqCst));
    if let Some(fixed) = state.rpc_body.lock().unwrap().clone() {
        return (code, fixed).into_response();
    }

    let reply = match serde_json::from_str::<Value>(&body) {
        Ok(Value::Array(requests)) => Value::Array(requests.iter().map(echo).collect()),
        Ok(request) => echo(&request),
        Err(_) => json!({"jsonrpc": "2.0", "error": {"code": -32700, "message": "Parse error"}, "id": null}),
    };
    (code, reply.to_string()).into_response()
}

async fn sse(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let hit = state.sse_hits.fetch_add(1, Ordering::SeqCst);
    *state.last_event_id.lock().unwrap() = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let delay = state.sse_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let code = state.sse_status.load(Ordering::SeqCst);
    if code != 200 {
        return status(code).into_response();
    }

    let chunks = state.sse_chunks.lock().unwrap().clone();
    let chunks = futures_util::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
    let body = if hit < state.sse_drop_first.load(Ordering::SeqCst) {
        Body::from_stream(chunks)
    } else {
        Body::from_stream(chunks.chain(futures_util::stream::pending()))
    };

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn mcp_ws(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<MockState>>,
) -> Response {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    *state.last_api_key.lock().unwrap() = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(mcp_ws_session)
}

/// Scripted by method name:
/// - `never`: no reply
/// - `delay` `{ms}`: reply after `ms`
/// - `notify`: a server notification, then the reply
/// - `close` `{code}`: close the socket with `code`
/// - anything else: immediate echo
async fn mcp_ws_session(socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let reply = Message::Text(echo(&request).to_string().into());

        match request["method"].as_str().unwrap_or_default() {
            "never" => {}
            "delay" => {
                let ms = request["params"]["ms"].as_u64().unwrap_or(0);
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    let _ = tx.send(reply);
                });
            }
            "notify" => {
                let note = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}});
                let _ = tx.send(Message::Text(note.to_string().into()));
                let _ = tx.send(reply);
            }
            "close" => {
                let code = request["params"]["code"].as_u64().unwrap_or(1000) as u16;
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code,
                    reason: "scripted close".into(),
                })));
                break;
            }
            _ => {
                let _ = tx.send(reply);
            }
        }
    }

    drop(tx);
    let _ = writer.await;
}

async fn feed(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<MockState>>,
) -> Response {
    let hit = state.feed_hits.fetch_add(1, Ordering::SeqCst);
    if hit < state.feed_reject_first.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let key = query.get("api_key").cloned();
    *state.feed_last_key.lock().unwrap() = key.clone();

    let required = state.feed_required_key.lock().unwrap().clone();
    if let Some(required) = required {
        if key.as_deref() != Some(required.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    ws.on_upgrade(move |socket| feed_session(socket, state))
}

async fn feed_session(mut socket: WebSocket, state: Arc<MockState>) {
    let connected = json!({"type": "Connected", "timestamp": 1}).to_string();
    if socket.send(Message::Text(connected.into())).await.is_err() {
        return;
    }
    let events = state.feed_events.lock().unwrap().clone();
    for event in events {
        if socket.send(Message::Text(event.into())).await.is_err() {
            return;
        }
    }

    let close = state.feed_close_codes.lock().unwrap().pop_front();
    if let Some(code) = close {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: "scripted close".into(),
            })))
            .await;
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}
