//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection lost:
//!     → circuit_breaker.rs (count failure, fail fast once open)
//!     → backoff.rs (delay for this attempt)
//!     → scheduler.rs (cancellable reconnect timer)
//! ```
//!
//! # Design Decisions
//! - Backoff is a pure function; each client keeps its own attempt counter
//! - Every timer handle is retained so disconnect can cancel it
//! - Authentication failures bypass the counter and open the breaker at once

pub mod backoff;
pub mod circuit_breaker;
pub mod scheduler;

pub use backoff::{compute_backoff, update_ema, BackoffConfig};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use scheduler::{Scheduler, TaskHandle, TaskSlot};
