/// Web search provider backed by the Tavily API
///
/// Holds a pool of API keys. A key rejected with 401/403/429 is abandoned
/// for the next one; the cursor is shared across invocations so later calls
/// start from the last key that worked.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use super::require_credential;
use crate::config::ProviderConfig;
use crate::tools::{
    InputSchema, ParamSpec, Provider, ProviderClient, RawResult, Shape, ToolDescriptor, ToolError,
    ToolResult, ValidatedArgs,
};
use crate::upstream::{classify_status, Transport, Upstream, UpstreamRequest, UpstreamResponse};

pub struct SearchClient {
    config: ProviderConfig,
    upstream: Upstream,
    cursor: AtomicUsize,
}

impl SearchClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_upstream(config, Upstream::from_config(Provider::Search, config))
    }

    pub fn with_transport(config: &ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_upstream(config, Upstream::new(Provider::Search, config, transport))
    }

    fn with_upstream(config: &ProviderConfig, upstream: Upstream) -> Self {
        Self {
            config: config.clone(),
            upstream,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Index of the key the next invocation starts from
    pub fn active_key(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    async fn search(&self, args: &ValidatedArgs) -> ToolResult<RawResult> {
        let keys = &self.config.credentials;
        if keys.is_empty() {
            return Err(ToolError::Unauthorized("TAVILY_API_KEYS is not set".to_string()));
        }

        let payload = json!({
            "query": args.require_str("query")?,
            "search_depth": args.str("search_depth").unwrap_or("basic"),
            "include_answer": args.bool("include_answer").unwrap_or(true),
            "max_results": args.i64("max_results").unwrap_or(5),
        });
        let url = format!("{}/search", self.config.base_url);

        let start = self.cursor.load(Ordering::Relaxed) % keys.len();
        let mut last: Option<UpstreamResponse> = None;
        for offset in 0..keys.len() {
            let index = (start + offset) % keys.len();
            let mut body = payload.clone();
            body["api_key"] = json!(keys[index].expose());

            let resp = self
                .upstream
                .exchange(UpstreamRequest::post(url.as_str(), body))
                .await?;

            if matches!(resp.status, 401 | 403 | 429) {
                warn!(
                    target: "search",
                    key_index = index,
                    status = resp.status,
                    "Tavily key rejected; failing over"
                );
                last = Some(resp);
                continue;
            }

            if index != start {
                self.cursor.store(index, Ordering::Relaxed);
                info!(target: "search", key_index = index, "Switched active Tavily key");
            }
            let resp = classify_status(Provider::Search, resp)?;
            return Ok(RawResult::new(Provider::Search, Shape::SearchHits, resp.json()?));
        }

        // Every key was rejected; surface the last rejection
        Err(match last {
            Some(resp) if resp.status == 429 => ToolError::UpstreamRejected(format!(
                "all {} Tavily keys are rate limited or out of quota",
                keys.len()
            )),
            _ => ToolError::Unauthorized(format!("all {} Tavily keys were rejected", keys.len())),
        })
    }
}

#[async_trait]
impl ProviderClient for SearchClient {
    fn provider(&self) -> Provider {
        Provider::Search
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            "web_search",
            "Search the web and return ranked results with an optional synthesized answer",
            Provider::Search,
            InputSchema::new(vec![
                ParamSpec::string("query", "Search query"),
                ParamSpec::one_of("search_depth", "Search depth", &["basic", "advanced"])
                    .with_default(json!("basic")),
                ParamSpec::boolean("include_answer", "Include a synthesized answer")
                    .with_default(json!(true)),
                ParamSpec::integer("max_results", "Maximum results", Some(1), Some(20))
                    .with_default(json!(5)),
            ]),
        )]
    }

    fn ensure_configured(&self) -> ToolResult<()> {
        require_credential(&self.config, "TAVILY_API_KEYS").map(|_| ())
    }

    async fn invoke(&self, tool: &str, args: &ValidatedArgs) -> ToolResult<RawResult> {
        debug!(target: "search", tool = %tool, key_index = self.active_key(), "Invoking Tavily");
        match tool {
            "web_search" => self.search(args).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
