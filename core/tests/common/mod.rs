//! Shared fixtures for gateway integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use toolgate_core::providers::register_all;
use toolgate_core::upstream::{
    Transport, TransportError, Upstream, UpstreamRequest, UpstreamResponse,
};
use toolgate_core::{
    Gateway, InputSchema, ParamSpec, Provider, ProviderClient, ProviderConfig, RawResult,
    RetryPolicy, Shape, ToolDescriptor, ToolError, ToolResult, ValidatedArgs,
};

type Responder =
    Box<dyn Fn(&UpstreamRequest) -> Result<UpstreamResponse, TransportError> + Send + Sync>;

/// Transport stub that counts and records every outbound call
pub struct CountingTransport {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl CountingTransport {
    pub fn from_fn<F>(f: F) -> Arc<Self>
    where
        F: Fn(&UpstreamRequest) -> Result<UpstreamResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(f),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn responding(status: u16, body: &str) -> Arc<Self> {
        let body = body.to_string();
        Self::from_fn(move |_| Ok(UpstreamResponse::new(status, body.clone())))
    }

    /// Answers only after `delay`, long past any test timeout
    pub fn hanging(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(|_| Ok(UpstreamResponse::new(200, "{}"))),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&request)
    }
}

/// Provider config with a credential, a 50 ms timeout and two fast retries
pub fn fast_config() -> ProviderConfig {
    ProviderConfig::new("https://stub.test")
        .with_credential("test-key")
        .with_timeout_ms(50)
        .with_retry(RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        })
}

/// Weather-by-city client over an arbitrary transport; whatever JSON the
/// transport returns is treated as an observation.
pub struct CityWeatherClient {
    upstream: Upstream,
}

impl CityWeatherClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            upstream: Upstream::new(Provider::Weather, &fast_config(), transport),
        }
    }
}

#[async_trait]
impl ProviderClient for CityWeatherClient {
    fn provider(&self) -> Provider {
        Provider::Weather
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            "weather",
            "Current weather for a city",
            Provider::Weather,
            InputSchema::new(vec![ParamSpec::string("city", "City name")]),
        )]
    }

    fn ensure_configured(&self) -> ToolResult<()> {
        Ok(())
    }

    async fn invoke(&self, tool: &str, args: &ValidatedArgs) -> ToolResult<RawResult> {
        if tool != "weather" {
            return Err(ToolError::NotFound(tool.to_string()));
        }
        let request = UpstreamRequest::get("https://stub.test/weather")
            .query("city", args.require_str("city")?);
        let body: Value = self.upstream.send(request).await?.json()?;
        Ok(RawResult::new(Provider::Weather, Shape::Observation, body))
    }
}

/// Gateway over the given clients
pub fn gateway(clients: Vec<Arc<dyn ProviderClient>>) -> Gateway {
    Gateway::new(Arc::new(register_all(clients).unwrap()))
}
