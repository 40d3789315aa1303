//! Gateway dispatcher: resolve, validate, invoke, normalize, and wrap every
//! outcome in an [`InvocationResult`] envelope.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::normalize::normalize;
use crate::tools::{CapabilityRegistry, ErrorKind, Provider, ToolError, ToolResult};

/// A single tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationError {
    pub kind: ErrorKind,
    pub message: String,
    /// Absent when the tool name did not resolve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

/// Uniform envelope returned for every invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
}

impl InvocationResult {
    pub fn success(payload: Value) -> Self {
        Self {
            status: InvocationStatus::Success,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: &ToolError, provider: Option<Provider>) -> Self {
        Self {
            status: InvocationStatus::Error,
            payload: None,
            error: Some(InvocationError {
                kind: error.kind(),
                message: error.message().to_string(),
                provider,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Routes invocations to provider clients through a frozen registry
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<CapabilityRegistry>,

    // OpenTelemetry metrics
    invocations_counter: Counter<u64>,
    errors_counter: Counter<u64>,
    invoke_latency: Histogram<f64>,
}

impl Gateway {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        let meter = global::meter("toolgate.gateway");

        let invocations_counter = meter
            .u64_counter("toolgate.gateway.invocations_total")
            .with_description("Total number of tool invocations")
            .init();

        let errors_counter = meter
            .u64_counter("toolgate.gateway.errors_total")
            .with_description("Total number of failed tool invocations")
            .init();

        let invoke_latency = meter
            .f64_histogram("toolgate.gateway.invoke_latency_ms")
            .with_description("Tool invocation latency in milliseconds")
            .init();

        info!(target: "gateway", tools = registry.len(), "Gateway ready");

        Self {
            registry,
            invocations_counter,
            errors_counter,
            invoke_latency,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Execute one invocation. Never fails: every outcome is an envelope.
    #[tracing::instrument(skip(self, request), fields(tool = %request.tool))]
    pub async fn dispatch(&self, request: InvocationRequest) -> InvocationResult {
        let start_time = Instant::now();
        let (result, provider) = self.execute(&request).await;

        let provider_label = provider.map(|p| p.as_str()).unwrap_or("none");
        let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        self.invoke_latency.record(
            elapsed_ms,
            &[
                KeyValue::new("tool", request.tool.clone()),
                KeyValue::new("provider", provider_label),
            ],
        );

        match result {
            Ok(payload) => {
                self.invocations_counter.add(
                    1,
                    &[
                        KeyValue::new("tool", request.tool.clone()),
                        KeyValue::new("provider", provider_label),
                        KeyValue::new("status", "success"),
                    ],
                );
                debug!(target: "gateway", tool = %request.tool, elapsed_ms, "Invocation succeeded");
                InvocationResult::success(payload)
            }
            Err(e) => {
                warn!(
                    target: "gateway",
                    tool = %request.tool,
                    provider = provider_label,
                    kind = %e.kind(),
                    error = %e,
                    "Invocation failed"
                );
                self.invocations_counter.add(
                    1,
                    &[
                        KeyValue::new("tool", request.tool.clone()),
                        KeyValue::new("provider", provider_label),
                        KeyValue::new("status", "error"),
                    ],
                );
                self.errors_counter.add(
                    1,
                    &[
                        KeyValue::new("tool", request.tool.clone()),
                        KeyValue::new("provider", provider_label),
                        KeyValue::new("kind", e.kind().as_str()),
                    ],
                );
                InvocationResult::failure(&e, provider)
            }
        }
    }

    async fn execute(&self, request: &InvocationRequest) -> (ToolResult<Value>, Option<Provider>) {
        // Unknown names fail here, before any argument or network work
        let registration = match self.registry.resolve(&request.tool) {
            Ok(registration) => registration,
            Err(e) => return (Err(e), None),
        };
        let provider = registration.descriptor.provider;

        let result: ToolResult<Value> = async {
            let args = registration
                .descriptor
                .input_schema
                .validate(&request.arguments)?;
            let raw = registration.client.invoke(&request.tool, &args).await?;
            normalize(provider, &raw)
        }
        .await;

        (result, Some(provider))
    }
}
