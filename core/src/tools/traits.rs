use super::error::ToolResult;
use super::schema::{InputSchema, ValidatedArgs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four upstream capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Weather,
    Geo,
    Memory,
    Search,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Weather => "weather",
            Provider::Geo => "geo",
            Provider::Memory => "memory",
            Provider::Search => "search",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of one tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique tool name (e.g. "weather", "poi_search")
    pub name: String,
    /// A human-readable description of what the tool does
    pub description: String,
    pub provider: Provider,
    pub input_schema: InputSchema,
}

impl ToolDescriptor {
    pub fn new(
        name: &str,
        description: &str,
        provider: Provider,
        input_schema: InputSchema,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            provider,
            input_schema,
        }
    }
}

/// Semantic kind of a raw provider payload; selects the normalization rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Observation,
    HourlyForecast,
    DailyForecast,
    /// Minute-level precipitation nowcast
    Precipitation,
    Alerts,
    AirQuality,
    AirQualityForecast,
    LifeIndices,
    Storms,
    /// Observed track or forecast positions of one tropical storm
    StormPath,
    Tides,
    SolarRadiation,
    Astronomy,
    Places,
    Route,
    Memories,
    MemoryEvents,
    SearchHits,
}

/// Vendor payload handed from a client to the normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub provider: Provider,
    pub shape: Shape,
    pub body: Value,
}

impl RawResult {
    pub fn new(provider: Provider, shape: Shape, body: Value) -> Self {
        Self {
            provider,
            shape,
            body,
        }
    }
}

/// Wraps one upstream vendor API and backs one or more tools
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Descriptors of every tool this client serves
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Fails when required configuration (credential, endpoint) is absent
    fn ensure_configured(&self) -> ToolResult<()>;

    /// Execute `tool` with schema-checked arguments
    async fn invoke(&self, tool: &str, args: &ValidatedArgs) -> ToolResult<RawResult>;
}
