//! Stateless request/response transport.
//!
//! # Responsibilities
//! - Prove reachability with a health probe, falling back to a ping call
//! - Issue one POST per `send` / `send_batch`
//! - Turn empty and malformed bodies into well-formed envelopes
//!
//! # Design Decisions
//! - No reconnection; every call stands alone
//! - `disconnect` cancels calls still in flight
//! - `HttpExchange` is shared with the push transport, which sends its
//!   outbound traffic the same way

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use url::Url;

use crate::config::TransportConfig;
use crate::protocol::endpoint::{health_url, parse_endpoint, rpc_url};
use crate::protocol::envelope::{parse_batch_body, parse_response_body};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::core::TransportCore;
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::events::{EventHandler, Subscription};
use crate::transport::model::{ConnectionInfo, ConnectionState, TransportKind};
use crate::transport::Transport;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// POST helper shared by the stateless and push transports.
#[derive(Debug)]
pub struct HttpExchange {
    client: Client,
    api_key: Option<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
    cancel: watch::Sender<u64>,
}

impl HttpExchange {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        let (cancel, _) = watch::channel(0);
        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            connect_timeout,
            cancel,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Attach the API key, if one is configured.
    pub fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    pub fn get(&self, url: &Url) -> RequestBuilder {
        self.authorize(self.client.get(url.clone()))
    }

    /// Abort every call currently running through this exchange.
    pub fn cancel_in_flight(&self) {
        self.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// Health probe, then ping fallback. Any non-5xx ping answer counts.
    pub async fn probe(&self, base: &Url) -> TransportResult<()> {
        let health = health_url(base);
        let health_error = match self
            .get(&health)
            .timeout(self.connect_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => format!("health check returned {}", response.status()),
            Err(e) => format!("health check failed: {}", e),
        };
        tracing::debug!(url = %health, reason = %health_error, "Health probe failed, trying ping");

        let body = serde_json::to_vec(&JsonRpcRequest::ping())?;
        let ping = self
            .authorize(self.client.post(rpc_url(base)))
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.connect_timeout)
            .body(body)
            .send()
            .await;
        match ping {
            Ok(response) if !response.status().is_server_error() => Ok(()),
            Ok(response) => Err(TransportError::Connection(format!(
                "{}; ping returned {}",
                health_error,
                response.status()
            ))),
            Err(e) => Err(TransportError::Connection(format!(
                "{}; ping failed: {}",
                health_error, e
            ))),
        }
    }

    /// Round-trip one request.
    pub async fn send(
        &self,
        core: &TransportCore,
        url: &Url,
        request: &JsonRpcRequest,
    ) -> TransportResult<JsonRpcResponse> {
        let body = serde_json::to_vec(request)?;
        let text = self.exchange(core, url, body).await?;
        Ok(parse_response_body(&text, request.id.as_ref()))
    }

    /// Round-trip one batch payload.
    pub async fn send_batch(
        &self,
        core: &TransportCore,
        url: &Url,
        requests: &[JsonRpcRequest],
    ) -> TransportResult<Vec<JsonRpcResponse>> {
        let body = serde_json::to_vec(requests)?;
        let text = self.exchange(core, url, body).await?;
        Ok(parse_batch_body(&text, requests))
    }

    async fn exchange(&self, core: &TransportCore, url: &Url, body: Vec<u8>) -> TransportResult<String> {
        let sent = body.len();
        let started = Instant::now();
        let text = self
            .cancellable(async {
                let response = self
                    .authorize(self.client.post(url.clone()))
                    .header(CONTENT_TYPE, "application/json")
                    .timeout(self.request_timeout)
                    .body(body)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TransportError::Connection(format!(
                        "POST {} returned {}",
                        url, status
                    )));
                }
                Ok(response.text().await?)
            })
            .await?;

        core.add_bytes_sent(sent);
        core.add_bytes_received(text.len());
        core.complete_exchange(started.elapsed());
        Ok(text)
    }

    async fn cancellable<F, T>(&self, call: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        let mut cancelled = self.cancel.subscribe();
        tokio::select! {
            result = call => result,
            _ = cancelled.changed() => Err(TransportError::ConnectionClosed(
                "request cancelled by disconnect".to_string(),
            )),
        }
    }
}

/// Request/response transport over plain HTTP POSTs.
pub struct HttpTransport {
    core: TransportCore,
    exchange: HttpExchange,
    base: ArcSwapOption<Url>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        Ok(Self {
            core: TransportCore::new(TransportKind::Http),
            exchange: HttpExchange::new(config)?,
            base: ArcSwapOption::empty(),
        })
    }

    fn target(&self) -> TransportResult<Arc<Url>> {
        match self.base.load_full() {
            Some(base) if self.core.is_connected() => Ok(base),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn observe<T>(&self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(e) = &result {
            tracing::warn!(transport = "http", error = %e, "Request failed");
            self.core.record_failure(e);
        }
        result
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.core.snapshot()
    }

    async fn connect(&self, endpoint: &str) -> TransportResult<()> {
        let base = self.observe(parse_endpoint(endpoint))?;
        self.core.set_state(ConnectionState::Connecting);

        match self.exchange.probe(&base).await {
            Ok(()) => {
                let url = rpc_url(&base);
                tracing::info!(transport = "http", endpoint = %url, "Connected");
                self.core.mark_connected(url.as_str());
                self.base.store(Some(Arc::new(url)));
                Ok(())
            }
            Err(e) => {
                tracing::error!(transport = "http", endpoint = %base, error = %e, "Connect failed");
                self.core.set_state(ConnectionState::Error);
                self.core.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.exchange.cancel_in_flight();
        self.base.store(None);
        self.core.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> TransportResult<JsonRpcResponse> {
        let result = match self.target() {
            Ok(url) => self.exchange.send(&self.core, &url, &request).await,
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    async fn send_batch(
        &self,
        requests: Vec<JsonRpcRequest>,
    ) -> TransportResult<Vec<JsonRpcResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let result = match self.target() {
            Ok(url) => self.exchange.send_batch(&self.core, &url, &requests).await,
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    fn on(&self, handler: EventHandler) -> Subscription {
        self.core.subscribe(handler)
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }
}
