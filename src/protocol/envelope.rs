//! JSON-RPC 2.0 envelope types.
//!
//! One request goes out, one response comes back, paired by [`RequestId`].
//! Response bodies that cannot be decoded are turned into a `-32700`
//! envelope so callers always hold a well-formed response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC parse error code.
pub const PARSE_ERROR: i32 = -32700;

/// Error code used for per-request transport failures inside a batch.
pub const TRANSPORT_ERROR: i32 = -32000;

/// Maximum number of body characters quoted in a parse-error message.
const PARSE_ERROR_EXCERPT: usize = 100;

/// Correlation id pairing a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// Outbound JSON-RPC request. A request without an id is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    /// Create a request without an id.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The no-op call used to prove an endpoint is reachable.
    pub fn ping() -> Self {
        Self::new("ping", None).with_id(0)
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Inbound JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Stand-in for an empty response body.
    pub fn acknowledged(id: Option<RequestId>) -> Self {
        Self::success(id, serde_json::json!({ "acknowledged": true }))
    }

    /// Envelope returned when a body is not a valid response.
    pub fn parse_error(body: &str) -> Self {
        Self::failure(
            None,
            JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", excerpt(body))),
        )
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decode the body of a single round trip.
pub fn parse_response_body(body: &str, request_id: Option<&RequestId>) -> JsonRpcResponse {
    if body.trim().is_empty() {
        return JsonRpcResponse::acknowledged(request_id.cloned());
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Response body is not a JSON-RPC envelope");
        JsonRpcResponse::parse_error(body)
    })
}

/// Decode the body of a batch round trip.
///
/// The result always has one entry per request.
pub fn parse_batch_body(body: &str, requests: &[JsonRpcRequest]) -> Vec<JsonRpcResponse> {
    if body.trim().is_empty() {
        return requests
            .iter()
            .map(|r| JsonRpcResponse::acknowledged(r.id.clone()))
            .collect();
    }
    match serde_json::from_str::<Vec<JsonRpcResponse>>(body) {
        Ok(responses) => responses,
        Err(e) => {
            tracing::debug!(error = %e, "Batch body is not an array of JSON-RPC envelopes");
            requests
                .iter()
                .map(|_| JsonRpcResponse::parse_error(body))
                .collect()
        }
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(PARSE_ERROR_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_an_acknowledgment() {
        let id = RequestId::Number(7);
        let response = parse_response_body("", Some(&id));
        assert!(!response.is_error());
        assert_eq!(response.id, Some(id));
        assert_eq!(response.result.unwrap()["acknowledged"], true);

        let response = parse_response_body("   \n", None);
        assert!(!response.is_error());
    }

    #[test]
    fn garbage_body_becomes_parse_error_envelope() {
        let response = parse_response_body("<html>bad gateway</html>", None);
        let error = response.error.expect("parse error");
        assert_eq!(error.code, PARSE_ERROR);
        assert_eq!(error.message, "Parse error: <html>bad gateway</html>");
        assert_eq!(response.id, None);

        let json = serde_json::to_value(JsonRpcResponse::parse_error("x")).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["jsonrpc"], "2.0");
    }

    #[test]
    fn parse_error_message_is_truncated() {
        let body = "é".repeat(250);
        let response = JsonRpcResponse::parse_error(&body);
        let message = response.error.unwrap().message;
        assert_eq!(message.chars().count(), "Parse error: ".len() + 100);
    }

    #[test]
    fn batch_body_keeps_one_entry_per_request() {
        let requests = vec![
            JsonRpcRequest::new("a", None).with_id(1),
            JsonRpcRequest::new("b", None).with_id(2),
        ];

        let acks = parse_batch_body("", &requests);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[1].id, Some(RequestId::Number(2)));

        let errors = parse_batch_body("{not json", &requests);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|r| r.error.as_ref().unwrap().code == PARSE_ERROR));

        let ok = parse_batch_body(
            r#"[{"jsonrpc":"2.0","result":1,"id":1},{"jsonrpc":"2.0","result":2,"id":2}]"#,
            &requests,
        );
        assert_eq!(ok[0].result, Some(serde_json::json!(1)));
    }

    #[test]
    fn request_ids_round_trip_untagged() {
        let request = JsonRpcRequest::new("tools/list", None).with_id("abc");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","method":"tools/list","id":"abc"}"#);

        let response: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":{},"id":42}"#).unwrap();
        assert_eq!(response.id, Some(RequestId::Number(42)));
    }
}
