/// Long-term memory provider backed by the Mem0 platform API
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::require_credential;
use crate::config::ProviderConfig;
use crate::tools::{
    InputSchema, ParamSpec, Provider, ProviderClient, RawResult, Shape, ToolDescriptor, ToolError,
    ToolResult, ValidatedArgs,
};
use crate::upstream::{Transport, Upstream, UpstreamRequest};

pub struct MemoryClient {
    config: ProviderConfig,
    upstream: Upstream,
}

impl MemoryClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            config: config.clone(),
            upstream: Upstream::from_config(Provider::Memory, config),
        }
    }

    pub fn with_transport(config: &ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: config.clone(),
            upstream: Upstream::new(Provider::Memory, config, transport),
        }
    }

    fn user_id<'a>(&'a self, args: &'a ValidatedArgs) -> &'a str {
        args.str("user_id")
            .or_else(|| self.config.option("user_id"))
            .unwrap_or("default")
    }

    async fn post(&self, path: &str, body: Value) -> ToolResult<Value> {
        let key = require_credential(&self.config, "MEM0_API_KEY")?;
        let request = UpstreamRequest::post(format!("{}{}", self.config.base_url, path), body)
            .header("Authorization", format!("Token {}", key.expose()));
        self.upstream.send(request).await?.json()
    }

    async fn search(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let body = json!({
            "query": args.require_str("query")?,
            "filters": { "user_id": self.user_id(args) },
            "top_k": args.i64("limit").unwrap_or(5),
        });
        let resp = self.post("/v2/memories/search/", body).await?;
        Ok(RawResult::new(Provider::Memory, Shape::Memories, resp))
    }

    async fn add(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let body = json!({
            "messages": [{ "role": "user", "content": args.require_str("content")? }],
            "user_id": self.user_id(args),
        });
        let resp = self.post("/v1/memories/", body).await?;
        Ok(RawResult::new(Provider::Memory, Shape::MemoryEvents, resp))
    }
}

#[async_trait]
impl ProviderClient for MemoryClient {
    fn provider(&self) -> Provider {
        Provider::Memory
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        let user_id = || {
            ParamSpec::string("user_id", "Memory owner; defaults to the configured user").optional()
        };
        vec![
            ToolDescriptor::new(
                "memory_search",
                "Search the user's long-term memories for facts relevant to a query",
                Provider::Memory,
                InputSchema::new(vec![
                    ParamSpec::string("query", "What to recall"),
                    user_id(),
                    ParamSpec::integer("limit", "Maximum memories to return", Some(1), Some(50))
                        .with_default(json!(5)),
                ]),
            ),
            ToolDescriptor::new(
                "memory_add",
                "Store a new fact or message in the user's long-term memory",
                Provider::Memory,
                InputSchema::new(vec![
                    ParamSpec::string("content", "Text to remember"),
                    user_id(),
                ]),
            ),
        ]
    }

    fn ensure_configured(&self) -> ToolResult<()> {
        require_credential(&self.config, "MEM0_API_KEY").map(|_| ())
    }

    async fn invoke(&self, tool: &str, args: &ValidatedArgs) -> ToolResult<RawResult> {
        debug!(target: "memory", tool = %tool, user_id = %self.user_id(args), "Invoking Mem0");
        match tool {
            "memory_search" => self.search(args).await,
            "memory_add" => self.add(args).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{Method, MockTransport, UpstreamResponse};

    fn config() -> ProviderConfig {
        ProviderConfig::new("https://mem0.test")
            .with_credential("m0-key")
            .with_option("user_id", "alice")
    }

    fn validated(client: &MemoryClient, tool: &str, args: Value) -> ValidatedArgs {
        client
            .tools()
            .into_iter()
            .find(|d| d.name == tool)
            .unwrap()
            .input_schema
            .validate(&args)
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_request_shape() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.method == Method::Post
                    && req.url == "https://mem0.test/v2/memories/search/"
                    && req.header_value("Authorization") == Some("Token m0-key")
                    && req.body
                        == Some(json!({
                            "query": "favourite food",
                            "filters": {"user_id": "alice"},
                            "top_k": 3
                        }))
            })
            .times(1)
            .returning(|_| {
                Ok(UpstreamResponse::new(
                    200,
                    r#"[{"id":"m1","memory":"Likes dumplings","score":0.91}]"#,
                ))
            });

        let client = MemoryClient::with_transport(&config(), Arc::new(mock));
        let args = validated(&client, "memory_search", json!({"query": "favourite food", "limit": 3}));
        let raw = client.invoke("memory_search", &args).await.unwrap();
        assert_eq!(raw.shape, Shape::Memories);
        assert_eq!(raw.body[0]["id"], "m1");
    }

    #[tokio::test]
    async fn test_add_uses_explicit_user() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .withf(|req| {
                req.url == "https://mem0.test/v1/memories/"
                    && req.body.as_ref().map(|b| b["user_id"] == "bob").unwrap_or(false)
            })
            .times(1)
            .returning(|_| {
                Ok(UpstreamResponse::new(
                    200,
                    r#"[{"id":"m2","event":"ADD","data":{"memory":"Has a cat"}}]"#,
                ))
            });

        let client = MemoryClient::with_transport(&config(), Arc::new(mock));
        let args = validated(&client, "memory_add", json!({"content": "I have a cat", "user_id": "bob"}));
        let raw = client.invoke("memory_add", &args).await.unwrap();
        assert_eq!(raw.shape, Shape::MemoryEvents);
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized() {
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Ok(UpstreamResponse::new(401, r#"{"detail":"Invalid token"}"#)));

        let client = MemoryClient::with_transport(&config(), Arc::new(mock));
        let args = validated(&client, "memory_search", json!({"query": "x"}));
        assert!(matches!(
            client.invoke("memory_search", &args).await,
            Err(ToolError::Unauthorized(_))
        ));
    }
}
