//! Stateless transport against the mock MCP server.

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcp_transport::config::TransportConfig;
use mcp_transport::protocol::envelope::PARSE_ERROR;
use mcp_transport::transport::{HttpTransport, Transport, TransportEvent};
use mcp_transport::{ConnectionState, JsonRpcRequest, RequestId, TransportError};

mod common;

fn transport() -> HttpTransport {
    HttpTransport::new(&TransportConfig::default()).unwrap()
}

#[tokio::test]
async fn test_connect_via_health_probe() {
    let server = common::MockServer::start().await;
    let t = transport();
    let states = Arc::new(Mutex::new(Vec::new()));
    let s = states.clone();
    let _sub = t.on(Arc::new(move |event: &TransportEvent| {
        if let TransportEvent::StateChange { current, .. } = event {
            s.lock().unwrap().push(*current);
        }
    }));

    t.connect(&server.endpoint()).await.unwrap();

    assert!(t.is_connected());
    assert_eq!(server.state.health_hits.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.rpc_hits.load(Ordering::SeqCst), 0);
    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    let info = t.connection_info();
    assert!(info.client_id.is_some());
    assert!(info.connected_at.is_some());
}

#[tokio::test]
async fn test_connect_falls_back_to_ping() {
    let server = common::MockServer::start().await;
    server.state.health_status.store(404, Ordering::SeqCst);
    server.state.rpc_status.store(400, Ordering::SeqCst);

    let t = transport();
    t.connect(&server.endpoint()).await.unwrap();

    assert!(t.is_connected());
    assert_eq!(server.state.rpc_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_fails_when_both_probes_fail() {
    let server = common::MockServer::start().await;
    server.state.health_status.store(503, Ordering::SeqCst);
    server.state.rpc_status.store(502, Ordering::SeqCst);

    let t = transport();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let e = errors.clone();
    let _sub = t.on(Arc::new(move |event: &TransportEvent| {
        if let TransportEvent::Error(message) = event {
            e.lock().unwrap().push(message.clone());
        }
    }));

    let err = t.connect(&server.endpoint()).await.unwrap_err();

    assert!(matches!(err, TransportError::Connection(_)));
    assert_eq!(t.connection_info().state, ConnectionState::Error);
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_send_round_trip_updates_metrics() {
    let server = common::MockServer::start().await;
    let t = transport();
    t.connect(&server.endpoint()).await.unwrap();

    let response = t
        .send(JsonRpcRequest::new("tools/list", Some(json!({"cursor": null}))).with_id(7))
        .await
        .unwrap();

    assert_eq!(response.id, Some(RequestId::Number(7)));
    assert_eq!(response.result.unwrap()["method"], "tools/list");

    let metrics = t.connection_info().metrics;
    assert_eq!(metrics.request_count, 1);
    assert!(metrics.bytes_sent > 0);
    assert!(metrics.bytes_received > 0);
    assert_eq!(metrics.ema_latency_ms, metrics.last_latency_ms);
}

#[tokio::test]
async fn test_empty_body_is_an_acknowledgment() {
    let server = common::MockServer::start().await;
    let t = transport();
    t.connect(&server.endpoint()).await.unwrap();
    *server.state.rpc_body.lock().unwrap() = Some(String::new());

    let response = t
        .send(JsonRpcRequest::new("notifications/initialized", None).with_id(3))
        .await
        .unwrap();
    assert!(!response.is_error());
    assert_eq!(response.result, Some(json!({"acknowledged": true})));
    assert_eq!(response.id, Some(RequestId::Number(3)));

    let batch = t
        .send_batch(vec![
            JsonRpcRequest::new("a", None).with_id(1),
            JsonRpcRequest::new("b", None).with_id(2),
        ])
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|r| r.result == Some(json!({"acknowledged": true}))));
}

#[tokio::test]
async fn test_garbage_body_is_a_parse_error_envelope() {
    let server = common::MockServer::start().await;
    let t = transport();
    t.connect(&server.endpoint()).await.unwrap();
    *server.state.rpc_body.lock().unwrap() = Some("<html>".repeat(50));

    let response = t
        .send(JsonRpcRequest::new("tools/list", None).with_id(1))
        .await
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, PARSE_ERROR);
    assert!(error.message.starts_with("Parse error: <html>"));
    assert!(error.message.len() <= "Parse error: ".len() + 100);
    assert_eq!(response.id, None);

    let batch = t
        .send_batch(vec![
            JsonRpcRequest::new("a", None).with_id(1),
            JsonRpcRequest::new("b", None).with_id(2),
        ])
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|r| r.error.as_ref().map(|e| e.code) == Some(PARSE_ERROR)));
}

#[tokio::test]
async fn test_batch_round_trip() {
    let server = common::MockServer::start().await;
    let t = transport();
    t.connect(&server.endpoint()).await.unwrap();

    let responses = t
        .send_batch(vec![
            JsonRpcRequest::new("tools/list", None).with_id(1),
            JsonRpcRequest::new("resources/list", None).with_id("two"),
        ])
        .await
        .unwrap();

    assert_eq!(server.state.rpc_hits.load(Ordering::SeqCst), 1);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].id, Some(RequestId::from("two")));
    assert_eq!(responses[1].result.as_ref().unwrap()["method"], "resources/list");
}

#[tokio::test]
async fn test_server_error_status_is_a_connection_error() {
    let server = common::MockServer::start().await;
    let t = transport();
    t.connect(&server.endpoint()).await.unwrap();
    server.state.rpc_status.store(500, Ordering::SeqCst);

    let err = t
        .send(JsonRpcRequest::new("tools/list", None).with_id(1))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)));
    assert_eq!(t.connection_info().metrics.error_count, 1);
}

#[tokio::test]
async fn test_disconnect_cancels_in_flight_call() {
    let server = common::MockServer::start().await;
    let t = Arc::new(transport());
    t.connect(&server.endpoint()).await.unwrap();
    server.state.rpc_delay_ms.store(5_000, Ordering::SeqCst);

    let caller = t.clone();
    let call = tokio::spawn(async move {
        caller
            .send(JsonRpcRequest::new("slow", None).with_id(1))
            .await
    });
    assert!(common::eventually(Duration::from_secs(2), || server.state.rpc_hits.load(Ordering::SeqCst) == 1).await);

    t.disconnect().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call should be cancelled promptly")
        .unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
    assert_eq!(t.connection_info().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let server = common::MockServer::start().await;
    let config = TransportConfig {
        api_key: Some("secret-key".to_string()),
        ..TransportConfig::default()
    };
    let t = HttpTransport::new(&config).unwrap();
    t.connect(&server.endpoint()).await.unwrap();
    t.send(JsonRpcRequest::new("ping", None).with_id(1)).await.unwrap();

    assert_eq!(
        server.state.last_api_key.lock().unwrap().as_deref(),
        Some("secret-key")
    );
}
