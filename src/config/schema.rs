//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::resilience::backoff::BackoffConfig;
use crate::resilience::circuit_breaker::DEFAULT_FAILURE_THRESHOLD;
use crate::transport::model::TransportKind;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// RPC transport settings.
    pub transport: TransportConfig,

    /// Live trace feed settings.
    pub realtime: RealtimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// RPC transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Wire mechanism to use.
    pub kind: TransportKind,

    /// Base endpoint (e.g., "http://localhost:9600/mcp").
    pub endpoint: String,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Reconnect the full-duplex socket after an unexpected close.
    pub auto_reconnect: bool,

    /// Delay before re-opening a dropped push stream, unless the server
    /// sends its own `retry:` value.
    pub sse_retry_ms: u64,

    /// API key sent as `x-api-key`.
    pub api_key: Option<String>,

    /// Reconnect delay parameters.
    pub backoff: BackoffConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::WebSocket,
            endpoint: "http://localhost:9600/mcp".to_string(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            auto_reconnect: true,
            sse_retry_ms: 3_000,
            api_key: None,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Live trace feed configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Feed socket URL.
    pub url: String,

    /// API key appended as the `api_key` query parameter.
    pub api_key: Option<String>,

    /// Ring buffer capacity (most recent events kept).
    pub buffer_capacity: usize,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial connection, in milliseconds.
    pub cooldown_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Reconnect delay parameters, independent of the transport's.
    pub backoff: BackoffConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9600/ws/traces".to_string(),
            api_key: None,
            buffer_capacity: 500,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: 30_000,
            connect_timeout_ms: 10_000,
            backoff: BackoffConfig {
                base_ms: 1_000,
                cap_ms: 30_000,
                jitter_ms: 1_000,
            },
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9091".to_string(),
        }
    }
}
