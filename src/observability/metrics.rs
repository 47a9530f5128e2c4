//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Mirror transport and live-feed bookkeeping into the `metrics` facade
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `mcp_transport_requests_total` (counter): completed exchanges by transport
//! - `mcp_transport_errors_total` (counter): failed operations by transport
//! - `mcp_transport_latency_ms` (histogram): exchange latency by transport
//! - `mcp_transport_bytes_sent_total` / `mcp_transport_bytes_received_total` (counters)
//! - `mcp_transport_reconnects_total` (counter): scheduled reconnects by transport
//! - `mcp_realtime_events_total` (counter): trace events accepted by the live feed
//! - `mcp_realtime_failures_total` (counter): live-feed failures by category
//! - `mcp_realtime_buffer_len` (gauge): populated ring-buffer slots
//!
//! # Design Decisions
//! - Write-only side effects; `ConnectionInfo` stays the source of truth
//! - Without an installed recorder every call is a cheap no-op

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed request/response exchange.
pub fn record_exchange(transport: &'static str, latency: Duration) {
    counter!("mcp_transport_requests_total", "transport" => transport).increment(1);
    histogram!("mcp_transport_latency_ms", "transport" => transport)
        .record(latency.as_secs_f64() * 1_000.0);
}

pub fn record_bytes_sent(transport: &'static str, bytes: u64) {
    counter!("mcp_transport_bytes_sent_total", "transport" => transport).increment(bytes);
}

pub fn record_bytes_received(transport: &'static str, bytes: u64) {
    counter!("mcp_transport_bytes_received_total", "transport" => transport).increment(bytes);
}

pub fn record_error(transport: &'static str) {
    counter!("mcp_transport_errors_total", "transport" => transport).increment(1);
}

pub fn record_reconnect(transport: &'static str) {
    counter!("mcp_transport_reconnects_total", "transport" => transport).increment(1);
}

/// Record a trace event accepted by the live feed.
pub fn record_feed_event(buffer_len: usize) {
    counter!("mcp_realtime_events_total").increment(1);
    gauge!("mcp_realtime_buffer_len").set(buffer_len as f64);
}

/// Record a live-feed failure (`network` or `auth`).
pub fn record_feed_failure(category: &'static str) {
    counter!("mcp_realtime_failures_total", "category" => category).increment(1);
}
