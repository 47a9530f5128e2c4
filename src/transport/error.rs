//! Transport error taxonomy.

use thiserror::Error;

use crate::protocol::RequestId;

/// Errors that can occur while connecting or exchanging messages.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint unreachable or every probe path failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation requires an established connection.
    #[error("Transport is not connected")]
    NotConnected,

    /// Endpoint URL could not be used.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// HTTP client failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No matching response arrived in time.
    #[error("Request {id} timed out after {timeout_ms} ms")]
    RequestTimeout { id: RequestId, timeout_ms: u64 },

    /// Connection went away with the request still outstanding.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A request with this id is already awaiting its response.
    #[error("Request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    /// Credentials rejected. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Breaker open; attempt skipped.
    #[error("Circuit open, next attempt allowed in {retry_in_ms} ms")]
    CircuitOpen { retry_in_ms: u64 },

    /// Constructed outside a tokio runtime.
    #[error("No async runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
