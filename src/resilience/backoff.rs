//! Exponential backoff with jitter, and latency smoothing.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smoothing factor for [`update_ema`].
pub const EMA_ALPHA: f64 = 0.3;

/// Reconnect delay parameters, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay for attempt 0.
    pub base_ms: u64,
    /// Upper bound on the exponential term.
    pub cap_ms: u64,
    /// Upper bound on the random term added on top.
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            cap_ms: 30_000,
            jitter_ms: 500,
        }
    }
}

/// Calculate the delay before reconnect attempt `attempt` (0-based).
///
/// `min(base * 2^attempt, cap) + uniform(0..=jitter)`, so the result never
/// exceeds `cap + jitter`.
pub fn compute_backoff(attempt: u32, config: &BackoffConfig) -> Duration {
    let exponential = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let delay_ms = config.base_ms.saturating_mul(exponential).min(config.cap_ms);

    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter))
}

/// Exponential moving average with α = [`EMA_ALPHA`].
pub fn update_ema(previous: f64, sample: f64) -> f64 {
    EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * previous
}
