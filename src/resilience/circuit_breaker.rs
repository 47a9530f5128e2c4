//! Circuit breaker for connection attempts.
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: endpoint assumed down, attempts fail fast
//! - Half-Open: cooldown elapsed, one trial attempt allowed
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Closed/Half-Open → Open: fatal failure (trip), failure_count pinned at threshold
//! Open → Half-Open: cooldown elapsed since last failure
//! Half-Open → Closed: trial attempt succeeds
//! Half-Open → Open: trial attempt fails
//! ```
//!
//! # Design Decisions
//! - One breaker per client instance, never shared
//! - Time is passed in by the caller so transitions are deterministic
//! - Single trial in Half-Open (prevents hammering a recovering endpoint)

use serde::Serialize;
use std::time::{Duration, Instant};

/// Failures tolerated before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time the breaker stays open before allowing a trial.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(30_000);

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure-counting gate in front of connection attempts.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_count: u32,
    last_failure: Option<Instant>,
    state: BreakerState,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            state: BreakerState::Closed,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Ask permission for a connection attempt.
    ///
    /// Returns the remaining cooldown when the breaker is open. An open
    /// breaker whose cooldown has elapsed moves to half-open and admits one
    /// trial; further calls while that trial is outstanding are refused.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Err(self.remaining_cooldown(now).max(Duration::from_millis(1))),
            BreakerState::Open => {
                let remaining = self.remaining_cooldown(now);
                if remaining.is_zero() {
                    tracing::info!(failures = self.failure_count, "Circuit half-open, allowing trial connection");
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
        }
    }

    /// Any successful connection closes the breaker.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!("Circuit closed after successful connection");
        }
        self.failure_count = 0;
        self.last_failure = None;
        self.state = BreakerState::Closed;
    }

    /// Record a retryable failure and return the resulting state.
    pub fn record_failure(&mut self, now: Instant) -> BreakerState {
        self.failure_count = self.failure_count.saturating_add(1).min(self.threshold);
        self.last_failure = Some(now);

        if self.state == BreakerState::HalfOpen || self.failure_count >= self.threshold {
            if self.state != BreakerState::Open {
                tracing::warn!(failures = self.failure_count, "Circuit opened");
            }
            self.state = BreakerState::Open;
        }
        self.state
    }

    /// Open immediately regardless of the current count.
    pub fn trip(&mut self, now: Instant) {
        self.failure_count = self.threshold;
        self.last_failure = Some(now);
        self.state = BreakerState::Open;
    }

    /// Time left before a trial is allowed.
    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        match self.last_failure {
            Some(at) => self.cooldown.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}
