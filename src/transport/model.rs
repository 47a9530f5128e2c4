//! Connection value types shared by every transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle position of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Wire mechanism behind a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Stateless request/response.
    Http,
    /// Server-push stream with companion POSTs.
    Sse,
    /// Persistent full-duplex socket.
    #[serde(alias = "ws")]
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
            TransportKind::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "sse" => Ok(TransportKind::Sse),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            other => Err(format!("unknown transport kind '{}'", other)),
        }
    }
}

/// Exchange counters for one transport instance.
///
/// Everything except the two latency fields only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportMetrics {
    pub last_latency_ms: f64,
    pub ema_latency_ms: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub request_count: u64,
    pub error_count: u64,
}

/// Snapshot of a transport's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub transport: TransportKind,
    pub endpoint: Option<String>,
    pub client_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub connected_at: Option<u64>,
    /// Milliseconds since the Unix epoch.
    pub last_activity_at: Option<u64>,
    pub metrics: TransportMetrics,
}

impl ConnectionInfo {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport,
            endpoint: None,
            client_id: None,
            connected_at: None,
            last_activity_at: None,
            metrics: TransportMetrics::default(),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
