// Toolgate Core Library
// Multi-provider tool gateway: weather, geo, memory and search behind one tool interface

pub mod config;
pub mod gateway;
pub mod mcp;
pub mod normalize;
pub mod providers;
pub mod telemetry;
pub mod tools;
pub mod upstream;

// Export core types
pub use config::{Credential, GatewayConfig, ProviderConfig, RetryPolicy, ServerConfig};
pub use gateway::{Gateway, InvocationError, InvocationRequest, InvocationResult, InvocationStatus};
pub use normalize::normalize;
pub use providers::build_registry;
pub use tools::{
    CapabilityRegistry, ErrorKind, InputSchema, ParamSpec, Provider, ProviderClient, RawResult,
    Shape, ToolDescriptor, ToolError, ToolResult, ValidatedArgs,
};

// Error types
use thiserror::Error;

/// Startup-time failures. Invocation failures use [`ToolError`] instead.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Provider {provider} is not configured: {reason}")]
    Unconfigured { provider: Provider, reason: String },

    #[error("No providers registered; set at least one provider credential")]
    NoProviders,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
