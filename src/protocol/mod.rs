//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! caller JsonRpcRequest
//!     → envelope.rs (serialize)
//!     → endpoint.rs (pick sub-path for the transport kind)
//!     → transport
//!     → envelope.rs (decode body, empty → ack, garbage → -32700)
//!     → caller JsonRpcResponse
//! ```
//!
//! # Design Decisions
//! - Envelope decoding never throws; malformed bodies become error envelopes
//! - Endpoint derivation is pure and shared by all transports

pub mod endpoint;
pub mod envelope;

pub use envelope::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
