use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::types::{
    negotiate_version, CallToolParams, CallToolResult, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool, ServerCapabilities, ServerInfo,
    ToolContent, ToolsCapability, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use crate::gateway::{Gateway, InvocationRequest};

/// Routes MCP JSON-RPC methods onto the gateway. Transport agnostic: the
/// stdio loop and the HTTP endpoint both feed it raw messages.
#[derive(Clone)]
pub struct McpHandler {
    gateway: Gateway,
    server_name: String,
}

impl McpHandler {
    pub fn new(gateway: Gateway, server_name: impl Into<String>) -> Self {
        Self {
            gateway,
            server_name: server_name.into(),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Handle one raw JSON-RPC message. Notifications yield `None`.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "mcp", error = %e, "Unparseable JSON-RPC message");
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Invalid request: {}", e),
            )),
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            debug!(target: "mcp", method = %request.method, "Notification received");
            return None;
        };
        debug!(target: "mcp", method = %request.method, id = %id, "Request received");

        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.list_tools(id),
            "tools/call" => self.call_tool(id, request.params).await,
            other => {
                warn!(target: "mcp", method = %other, "Unknown method");
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other))
            }
        };
        Some(response)
    }

    fn initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        let version = negotiate_version(params.protocol_version.as_deref());

        if let Some(client) = &params.client_info {
            info!(
                target: "mcp",
                client = %client.name,
                client_version = %client.version,
                protocol = %version,
                "Client initialized"
            );
        }

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        to_response(id, &result)
    }

    fn list_tools(&self, id: Value) -> JsonRpcResponse {
        let tools = self
            .gateway
            .registry()
            .descriptors()
            .into_iter()
            .map(|d| McpTool {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.input_schema.to_json_schema(),
            })
            .collect();
        to_response(id, &ListToolsResult { tools })
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params for tools/call");
        };
        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
        };

        let result = self
            .gateway
            .dispatch(InvocationRequest::new(
                params.name,
                params.arguments.unwrap_or(Value::Null),
            ))
            .await;

        let is_error = !result.is_success();
        let structured = match (result.payload, result.error) {
            (Some(payload), _) => payload,
            (None, Some(error)) => serde_json::to_value(error).unwrap_or(Value::Null),
            (None, None) => Value::Null,
        };

        to_response(
            id,
            &CallToolResult {
                content: vec![ToolContent::Text {
                    text: structured.to_string(),
                }],
                structured_content: structured,
                is_error,
            },
        )
    }
}

fn to_response<T: serde::Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e)),
    }
}
