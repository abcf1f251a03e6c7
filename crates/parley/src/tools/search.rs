use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::{ToolContext, ToolHandler, ToolOutcome, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

pub const TAVILY_HOST: &str = "https://api.tavily.com";
pub const DEFAULT_MAX_RESULTS: usize = 2;

#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub host: String,
    pub api_key: String,
    pub max_results: usize,
}

impl WebSearchConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: TAVILY_HOST.to_string(),
            api_key: api_key.into(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Web search backed by the Tavily search API
pub struct WebSearch {
    client: Client,
    config: WebSearchConfig,
}

impl WebSearch {
    pub fn new(config: WebSearchConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, config })
    }

    async fn search(&self, query: &str) -> AgentResult<Vec<SearchHit>> {
        let url = format!("{}/search", self.config.host.trim_end_matches('/'));
        let payload = json!({
            "api_key": self.config.api_key,
            "query": query,
            "max_results": self.config.max_results,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("search request failed: {}", e)))?;

        match response.status() {
            StatusCode::OK => {}
            status => {
                return Err(AgentError::ExecutionError(format!(
                    "search service returned {}",
                    status
                )))
            }
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("invalid search response: {}", e)))?;

        Ok(body
            .results
            .into_iter()
            .take(self.config.max_results)
            .collect())
    }
}

#[async_trait]
impl ToolHandler for WebSearch {
    fn tool(&self) -> Tool {
        Tool::new(
            "web_search",
            "Search the web for current information. Returns the most relevant pages with a short excerpt of each.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    }
                }
            }),
        )
    }

    async fn call(&self, call: &ToolCall, _ctx: &ToolContext) -> AgentResult<ToolOutcome> {
        let query = call
            .str_arg("query")
            .ok_or_else(|| AgentError::InvalidParameters("'query' must be a string".into()))?;

        tracing::debug!(query, "web search");
        let hits = self.search(query).await?;
        let value = serde_json::to_value(hits).map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(ToolOutcome::Complete(ToolOutput::json(value)))
    }
}

/// Extracts the hits from a completed `web_search` result, mainly for display
pub fn hits_from_value(value: &Value) -> Vec<SearchHit> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}
