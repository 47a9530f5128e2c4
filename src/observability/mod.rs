//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Transports and the live feed produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stderr (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured key/value fields, never interpolated secrets
//! - Metrics are cheap (no-op until a recorder is installed)

pub mod logging;
pub mod metrics;
