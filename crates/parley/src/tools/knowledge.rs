use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ToolContext, ToolHandler, ToolOutcome, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::knowledge::{KnowledgeBase, Passage};
use crate::models::tool::{Tool, ToolCall};

/// Looks up passages in the local knowledge base
pub struct KnowledgeSearch {
    knowledge: Arc<KnowledgeBase>,
}

impl KnowledgeSearch {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl ToolHandler for KnowledgeSearch {
    fn tool(&self) -> Tool {
        Tool::new(
            "knowledge_search",
            "Search the local knowledge base of indexed documents. Returns the most relevant passages with the document each came from.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look up."
                    },
                    "k": {
                        "type": "integer",
                        "description": format!("How many passages to return. Defaults to {}.", self.knowledge.top_k())
                    }
                }
            }),
        )
    }

    async fn call(&self, call: &ToolCall, _ctx: &ToolContext) -> AgentResult<ToolOutcome> {
        let query = call
            .str_arg("query")
            .ok_or_else(|| AgentError::InvalidParameters("'query' must be a string".into()))?;
        let k = match call.arguments.get("k") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().filter(|k| *k > 0).ok_or_else(|| {
                AgentError::InvalidParameters("'k' must be a positive integer".into())
            })? as usize),
        };

        let passages = self
            .knowledge
            .search(query, k)
            .await
            .map_err(|e| AgentError::ExecutionError(format!("knowledge search failed: {}", e)))?;
        let value = serde_json::to_value(passages).map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(ToolOutcome::Complete(ToolOutput::json(value)))
    }
}

/// Extracts the passages from a completed `knowledge_search` result
pub fn passages_from_value(value: &Value) -> Vec<Passage> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(Passage {
                        source: item.get("source")?.as_str()?.to_string(),
                        chunk: item.get("chunk")?.as_u64()? as usize,
                        content: item.get("content")?.as_str()?.to_string(),
                        score: item.get("score")?.as_f64()? as f32,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
