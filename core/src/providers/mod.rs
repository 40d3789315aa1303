/// Provider clients for the four upstream vendors
pub mod geo;
pub mod memory;
pub mod search;
pub mod weather;

pub use geo::GeoClient;
pub use memory::MemoryClient;
pub use search::SearchClient;
pub use weather::WeatherClient;

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Credential, GatewayConfig, ProviderConfig};
use crate::tools::{CapabilityRegistry, ProviderClient, ToolError, ToolResult};
use crate::{GatewayError, Result};

/// Build the registry from configuration. Providers without a credential are
/// skipped; the others keep operating. Zero providers is fatal.
pub fn build_registry(config: &GatewayConfig) -> Result<CapabilityRegistry> {
    let clients: Vec<Arc<dyn ProviderClient>> = vec![
        Arc::new(WeatherClient::new(&config.weather)),
        Arc::new(GeoClient::new(&config.geo)),
        Arc::new(MemoryClient::new(&config.memory)),
        Arc::new(SearchClient::new(&config.search)),
    ];
    register_all(clients)
}

/// Register every configured client, skipping the unconfigured ones
pub fn register_all(clients: Vec<Arc<dyn ProviderClient>>) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    for client in clients {
        if let Err(e) = client.ensure_configured() {
            warn!(
                target: "registry",
                provider = %client.provider(),
                reason = %e.message(),
                "Provider not configured; its tools are disabled"
            );
            continue;
        }
        let added = registry.register_client(client.clone())?;
        info!(target: "registry", provider = %client.provider(), tools = added, "Provider enabled");
    }

    if registry.is_empty() {
        return Err(GatewayError::NoProviders);
    }
    Ok(registry)
}

/// First non-blank credential, or `Unauthorized` naming the variable that supplies it
fn require_credential<'a>(config: &'a ProviderConfig, var: &str) -> ToolResult<&'a Credential> {
    config
        .credential()
        .ok_or_else(|| ToolError::Unauthorized(format!("{} is not set", var)))
}

/// Vendors encode numbers as strings; read either form
fn code_of(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(value: Option<&Value>) -> &str {
    value.and_then(Value::as_str).unwrap_or_default()
}
