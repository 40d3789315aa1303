use std::sync::Arc;

use tracing::info;

use toolgate_core::config::ServeMode;
use toolgate_core::mcp::McpHandler;
use toolgate_core::{build_registry, Gateway, GatewayConfig};
use toolgate_server::{serve_http, serve_stdio};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();
    toolgate_core::telemetry::init_tracing()?;

    let config = GatewayConfig::load()?;
    let registry = build_registry(&config)?;
    info!(
        target: "server",
        tools = registry.len(),
        providers = ?registry.providers(),
        "Tool registry built"
    );

    let handler = McpHandler::new(Gateway::new(Arc::new(registry)), config.server.name.clone());

    match config.server.mode {
        ServeMode::Stdio => serve_stdio(handler).await?,
        ServeMode::Http => serve_http(handler, &config.server.addr).await?,
    }
    Ok(())
}
