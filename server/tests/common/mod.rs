//! Shared fixtures for server transport tests
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use toolgate_core::mcp::McpHandler;
use toolgate_core::providers::register_all;
use toolgate_core::{
    Gateway, InputSchema, ParamSpec, Provider, ProviderClient, RawResult, Shape, ToolDescriptor,
    ToolError, ToolResult, ValidatedArgs,
};

/// Answers every `weather` call with the same clear-sky observation
pub struct FixedWeatherClient;

#[async_trait]
impl ProviderClient for FixedWeatherClient {
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

    async fn invoke(&self, tool: &str, _args: &ValidatedArgs) -> ToolResult<RawResult> {
        match tool {
            "weather" => Ok(RawResult::new(
                Provider::Weather,
                Shape::Observation,
                json!({"temp_f": 70.7, "condition": "Clear"}),
            )),
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

pub fn handler() -> McpHandler {
    let registry = register_all(vec![Arc::new(FixedWeatherClient)]).unwrap();
    McpHandler::new(Gateway::new(Arc::new(registry)), "toolgate-test")
}
