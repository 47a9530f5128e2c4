//! Transport subsystem.
//!
//! # Responsibilities
//! - Define the capability contract every wire mechanism implements
//! - Own connection lifecycle, request/response correlation and metrics
//! - Broadcast lifecycle, message, metric and error events to subscribers
//!
//! # Data Flow
//! ```text
//! caller
//!     → create_transport(kind) → Arc<dyn Transport>
//!     → connect(endpoint)
//!         http.rs       GET <base>/health, fallback POST ping
//!         sse.rs        GET <base>/sse (stream) + POST <base>
//!         websocket.rs  <base>/ws (persistent, id-correlated)
//!     → send / send_batch
//!     → core.rs (state, metrics) → events.rs (subscribers)
//! ```
//!
//! # Design Decisions
//! - Callers never branch on the transport kind; the factory is the only
//!   place that does
//! - Connect and send failures are both returned and broadcast as events
//! - `ConnectionInfo` is handed out by value; the live copy never leaves
//!   its transport

pub mod core;
pub mod error;
pub mod events;
pub mod http;
pub mod model;
pub mod sse;
pub mod websocket;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

pub use error::{TransportError, TransportResult};
pub use events::{EventHandler, IncomingMessage, Subscription, TransportEvent};
pub use http::HttpTransport;
pub use model::{ConnectionInfo, ConnectionState, TransportKind, TransportMetrics};
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;

/// Uniform client-side RPC transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire mechanism behind this instance.
    fn kind(&self) -> TransportKind;

    /// Copy of the current connection state and metrics.
    fn connection_info(&self) -> ConnectionInfo;

    /// Establish the connection to a base endpoint such as
    /// `http://localhost:9600/mcp`.
    async fn connect(&self, endpoint: &str) -> TransportResult<()>;

    /// Tear down the connection, cancelling timers and rejecting anything
    /// still outstanding.
    async fn disconnect(&self) -> TransportResult<()>;

    /// One request, one response.
    async fn send(&self, request: JsonRpcRequest) -> TransportResult<JsonRpcResponse>;

    /// Several requests; the result has one entry per request.
    async fn send_batch(&self, requests: Vec<JsonRpcRequest>)
        -> TransportResult<Vec<JsonRpcResponse>>;

    /// Register an event handler.
    fn on(&self, handler: EventHandler) -> Subscription;

    fn is_connected(&self) -> bool {
        self.connection_info().state == ConnectionState::Connected
    }
}

/// Build the transport selected by `kind`.
///
/// The push and full-duplex transports run background tasks and must be
/// created inside a tokio runtime.
pub fn create_transport(
    kind: TransportKind,
    config: &TransportConfig,
) -> TransportResult<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Http => Arc::new(HttpTransport::new(config)?),
        TransportKind::Sse => Arc::new(SseTransport::new(config)?),
        TransportKind::WebSocket => Arc::new(WebSocketTransport::new(config)?),
    };
    tracing::debug!(transport = %kind, "Transport created");
    Ok(transport)
}
