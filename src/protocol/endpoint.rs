//! Endpoint derivation.
//!
//! Every transport is handed the same base URL (e.g. `http://host:9600/mcp`)
//! and derives its own sub-path from it:
//!
//! ```text
//! POST  <base>          request/response, push-transport outbound
//! GET   <base>/health   health probe (base ending in /mcp → /mcp/health)
//! GET   <base>/sse      server-push stream
//! GET   <base>/ws       full-duplex socket (http → ws, https → wss)
//! ```

use url::Url;

use crate::transport::error::{TransportError, TransportResult};

/// Parse and normalise a base endpoint (no trailing slash, no fragment).
pub fn parse_endpoint(endpoint: &str) -> TransportResult<Url> {
    let mut url = Url::parse(endpoint.trim())
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "{}: unsupported scheme '{}'",
                endpoint, other
            )))
        }
    }

    url.set_fragment(None);
    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&trimmed);
    Ok(url)
}

/// Health probe URL for a base endpoint.
pub fn health_url(base: &Url) -> Url {
    with_suffix(&http_scheme(base), "/health")
}

/// Server-push subscription URL.
pub fn sse_url(base: &Url) -> Url {
    with_suffix(&http_scheme(base), "/sse")
}

/// Full-duplex socket URL.
pub fn ws_url(base: &Url) -> Url {
    let mut url = with_suffix(base, "/ws");
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    // http(s) <-> ws(s) are both "special" schemes, so this cannot fail.
    let _ = url.set_scheme(scheme);
    url
}

/// URL used for outbound POSTs.
pub fn rpc_url(base: &Url) -> Url {
    http_scheme(base)
}

/// Live feed URL with the optional `api_key` query credential.
pub fn feed_url(url: &str, api_key: Option<&str>) -> TransportResult<Url> {
    let mut url = Url::parse(url)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", url, e)))?;
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        url.query_pairs_mut().append_pair("api_key", key);
    }
    Ok(url)
}

/// URL with its query string stripped, safe for logs.
pub fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

fn with_suffix(base: &Url, suffix: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), suffix);
    url.set_path(&path);
    url
}

fn http_scheme(base: &Url) -> Url {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "wss" | "https" => "https",
        _ => "http",
    };
    let _ = url.set_scheme(scheme);
    url
}
