//! Live trace feed subsystem.
//!
//! # Data Flow
//! ```text
//! ws://…/ws/traces?api_key=…
//!     → client.rs (breaker, backoff, close classification)
//!     → event.rs (Connected control frame | TraceEvent)
//!     → ring_buffer.rs (paused → held queue)
//!     → events() newest first, snapshot() / subscribe() for status
//! ```
//!
//! # Design Decisions
//! - Independent of the RPC transports; it never sends requests
//! - Memory is bounded by the configured capacity, twice over at most
//!   (ring plus held queue)

pub mod client;
pub mod event;
pub mod ring_buffer;

pub use client::{FeedSnapshot, FeedStatus, LiveFeedClient};
pub use event::{FeedFrame, TraceEvent};
pub use ring_buffer::RingBuffer;
