//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate endpoint URLs and schemes
//! - Validate value ranges (timeouts > 0, capacities > 0, base <= cap)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is handed to any client

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::ClientConfig;
use crate::resilience::backoff::BackoffConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let transport = &config.transport;
    check_url(
        &mut errors,
        "transport.endpoint",
        &transport.endpoint,
        &["http", "https", "ws", "wss"],
    );
    check_positive(&mut errors, "transport.request_timeout_ms", transport.request_timeout_ms);
    check_positive(&mut errors, "transport.connect_timeout_ms", transport.connect_timeout_ms);
    check_positive(&mut errors, "transport.sse_retry_ms", transport.sse_retry_ms);
    check_backoff(&mut errors, "transport.backoff", &transport.backoff);

    let realtime = &config.realtime;
    check_url(&mut errors, "realtime.url", &realtime.url, &["ws", "wss"]);
    if realtime.buffer_capacity == 0 {
        errors.push(ValidationError::new("realtime.buffer_capacity", "must be greater than 0"));
    }
    if realtime.failure_threshold == 0 {
        errors.push(ValidationError::new("realtime.failure_threshold", "must be greater than 0"));
    }
    check_positive(&mut errors, "realtime.connect_timeout_ms", realtime.connect_timeout_ms);
    check_backoff(&mut errors, "realtime.backoff", &realtime.backoff);

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str, schemes: &[&str]) {
    match Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("scheme '{}' not one of {}", url.scheme(), schemes.join(", ")),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    }
}

fn check_backoff(errors: &mut Vec<ValidationError>, field: &str, backoff: &BackoffConfig) {
    if backoff.base_ms > backoff.cap_ms {
        errors.push(ValidationError::new(
            field,
            format!("base_ms ({}) exceeds cap_ms ({})", backoff.base_ms, backoff.cap_ms),
        ));
    }
}
