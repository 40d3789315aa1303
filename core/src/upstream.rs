//! Shared HTTP plumbing for provider clients: transport seam, per-attempt
//! timeout, bounded retry of transient failures, per-provider concurrency
//! ceiling and HTTP status classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, RetryPolicy};
use crate::tools::{Provider, ToolError, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Vendor-neutral description of one outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Parse the body as JSON; anything else is `Malformed`
    pub fn json(&self) -> ToolResult<Value> {
        serde_json::from_str(&self.body)
            .map_err(|e| ToolError::Malformed(format!("invalid JSON body: {}", e)))
    }
}

/// Network-level failure reported by a [`Transport`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Sends a single HTTP request. reqwest in production, stubs in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// reqwest-backed transport; one connection pool per provider
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ProviderConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.http_client.get(&request.url),
            Method::Post => self.http_client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else if e.is_builder() {
                TransportError::Invalid(e.to_string())
            } else {
                TransportError::Io(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Io(e.to_string())
            }
        })?;

        Ok(UpstreamResponse { status, body })
    }
}

/// Per-provider outbound channel
pub struct Upstream {
    provider: Provider,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Upstream {
    /// Channel over the production reqwest transport
    pub fn from_config(provider: Provider, config: &ProviderConfig) -> Self {
        Self::new(provider, config, Arc::new(ReqwestTransport::new(config)))
    }

    pub fn new(provider: Provider, config: &ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            provider,
            transport,
            retry: config.retry.clone(),
            timeout: config.timeout(),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        }
    }

    /// Issue `request` and classify the HTTP status. Only
    /// `UpstreamUnavailable` is retried, up to the policy bound.
    pub async fn send(&self, request: UpstreamRequest) -> ToolResult<UpstreamResponse> {
        let resp = self.exchange(request).await?;
        classify_status(self.provider, resp)
    }

    /// Like [`Upstream::send`] but hands back any HTTP response unclassified,
    /// for callers that react to specific statuses themselves.
    pub async fn exchange(&self, request: UpstreamRequest) -> ToolResult<UpstreamResponse> {
        let mut retry = 0;
        loop {
            match self.attempt(request.clone()).await {
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.backoff(retry);
                    warn!(
                        target: "upstream",
                        provider = %self.provider,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient upstream failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, request: UpstreamRequest) -> ToolResult<UpstreamResponse> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            ToolError::UpstreamUnavailable(format!("{} channel closed", self.provider))
        })?;

        debug!(target: "upstream", provider = %self.provider, url = %request.url, "Sending upstream request");

        // Dropping the future on expiry cancels the in-flight call
        match timeout(self.timeout, self.transport.send(request)).await {
            Err(_) => Err(ToolError::UpstreamUnavailable(format!(
                "{} did not respond within {} ms",
                self.provider,
                self.timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(classify_transport(self.provider, e)),
            Ok(Ok(resp)) => Ok(resp),
        }
    }
}

fn classify_transport(provider: Provider, err: TransportError) -> ToolError {
    match err {
        TransportError::Invalid(msg) => {
            ToolError::UpstreamError(format!("{}: invalid request: {}", provider, msg))
        }
        other => ToolError::UpstreamUnavailable(format!("{}: {}", provider, other)),
    }
}

/// Map an HTTP status onto the failure taxonomy
pub fn classify_status(provider: Provider, resp: UpstreamResponse) -> ToolResult<UpstreamResponse> {
    let status = resp.status;
    let detail = snippet(&resp.body);
    match status {
        200..=299 => Ok(resp),
        401 | 403 => Err(ToolError::Unauthorized(format!(
            "{} rejected credentials (HTTP {}): {}",
            provider, status, detail
        ))),
        429 => Err(ToolError::UpstreamRejected(format!(
            "{} rate limit exceeded (HTTP 429): {}",
            provider, detail
        ))),
        400..=499 => Err(ToolError::UpstreamRejected(format!(
            "{} rejected request (HTTP {}): {}",
            provider, status, detail
        ))),
        500..=599 => Err(ToolError::UpstreamError(format!(
            "{} failed (HTTP {}): {}",
            provider, status, detail
        ))),
        _ => Err(ToolError::UpstreamError(format!(
            "{} returned unexpected HTTP {}",
            provider, status
        ))),
    }
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
