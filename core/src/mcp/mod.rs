/// MCP (Model Context Protocol) server surface
///
/// A thin JSON-RPC method router over the gateway; framing is left to the
/// transport (newline-delimited stdio or HTTP POST).
pub mod handler;
pub mod types;

pub use handler::McpHandler;
pub use types::{JsonRpcRequest, JsonRpcResponse};
