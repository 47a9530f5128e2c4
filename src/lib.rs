//! Client-side MCP transport library.
//!
//! Speaks JSON-RPC over three interchangeable transports (stateless HTTP,
//! server-push event stream, full-duplex WebSocket) behind one
//! [`Transport`] trait, plus a resilient consumer of the live trace feed.

pub mod config;
pub mod observability;
pub mod protocol;
pub mod realtime;
pub mod resilience;
pub mod transport;

pub use config::schema::ClientConfig;
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use realtime::{FeedSnapshot, FeedStatus, LiveFeedClient, TraceEvent};
pub use transport::{
    create_transport, ConnectionInfo, ConnectionState, Transport, TransportError,
    TransportEvent, TransportKind,
};
