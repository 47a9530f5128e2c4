//! Live feed wire shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One trace event pushed by the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "edge_id")]
    pub id: String,
    pub timestamp_us: u64,
    pub operation: String,
    #[serde(rename = "span_type")]
    pub kind: String,
    pub duration_ms: f64,
    pub tokens: u32,
    pub cost: f64,
    pub status: String,
    pub agent_id: u64,
    pub session_id: u64,
}

/// Classified feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    /// `{"type":"Connected"}` acknowledgment; carries no event.
    Connected,
    Event(TraceEvent),
}

impl FeedFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("type").and_then(Value::as_str) == Some("Connected") {
            return Ok(FeedFrame::Connected);
        }
        Ok(FeedFrame::Event(serde_json::from_value(value)?))
    }
}
