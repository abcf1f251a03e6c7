//! Tools the agent can call, and the registry that dispatches to them.
//!
//! A tool either completes with content (plus optional updates to the thread's
//! auxiliary state) or interrupts the loop to ask a human for input. Interrupts
//! are a tagged outcome, not an error.
pub mod human;
pub mod knowledge;
pub mod search;
pub mod sql;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::ToolRequest;
use crate::models::tool::{Tool, ToolCall};

/// What a completed tool call produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<Content>,
    /// Updates merged into the thread's auxiliary state by the orchestrator
    pub state: Map<String, Value>,
}

impl ToolOutput {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![Content::text(text)],
            state: Map::new(),
        }
    }

    pub fn json(value: Value) -> Self {
        Self {
            content: vec![Content::json(value)],
            state: Map::new(),
        }
    }

    pub fn with_state<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Complete(ToolOutput),
    /// Suspend the thread until a human supplies a resume payload
    Interrupt(Value),
}

/// Read-only view of the thread handed to a tool
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub thread_id: String,
    pub call_id: String,
    pub state: Map<String, Value>,
}

impl ToolContext {
    pub fn new<T: Into<String>, C: Into<String>>(
        thread_id: T,
        call_id: C,
        state: Map<String, Value>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            call_id: call_id.into(),
            state,
        }
    }
}

/// A capability the model can invoke by name
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and input schema advertised to the model
    fn tool(&self) -> Tool;

    async fn call(&self, call: &ToolCall, ctx: &ToolContext) -> AgentResult<ToolOutcome>;

    /// Deliver the human's answer to a call that previously interrupted
    async fn resume(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        _payload: Value,
    ) -> AgentResult<ToolOutput> {
        Err(AgentError::Internal(format!(
            "Tool {} does not accept resume payloads",
            call.name
        )))
    }
}

/// The settled result of one tool request, ready to be appended as a tool message
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub result: AgentResult<Vec<Content>>,
    pub state: Map<String, Value>,
}

impl Finished {
    fn from_result(result: AgentResult<ToolOutput>) -> Self {
        match result {
            Ok(output) => Finished {
                result: Ok(output.content),
                state: output.state,
            },
            Err(e) => Finished {
                result: Err(e),
                state: Map::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Finished(Finished),
    Interrupted(Value),
}

/// Tools keyed by name, built once at startup
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ToolHandler + 'static>(&mut self, handler: H) -> AgentResult<()> {
        let name = handler.tool().name;
        if self.handlers.contains_key(&name) {
            return Err(AgentError::Internal(format!(
                "Tool {} is already registered",
                name
            )));
        }
        self.order.push(name.clone());
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    pub fn with<H: ToolHandler + 'static>(mut self, handler: H) -> AgentResult<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Tool specs in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|handler| handler.tool())
            .collect()
    }

    fn lookup(&self, request: &ToolRequest) -> AgentResult<(ToolCall, Arc<dyn ToolHandler>)> {
        let call = request.tool_call.clone()?;
        let handler = self
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        check_required_arguments(&handler.tool(), &call)?;
        Ok((call, handler))
    }

    /// Run one request. Every failure is folded into the result so the loop can continue.
    pub async fn execute(&self, request: &ToolRequest, ctx: &ToolContext) -> Execution {
        let (call, handler) = match self.lookup(request) {
            Ok(found) => found,
            Err(e) => return Execution::Finished(Finished::from_result(Err(e))),
        };

        match handler.call(&call, ctx).await {
            Ok(ToolOutcome::Interrupt(payload)) => Execution::Interrupted(payload),
            Ok(ToolOutcome::Complete(output)) => {
                Execution::Finished(Finished::from_result(Ok(output)))
            }
            Err(e) => Execution::Finished(Finished::from_result(Err(e))),
        }
    }

    /// Hand a resume payload to the tool whose call was interrupted
    pub async fn resume(&self, request: &ToolRequest, ctx: &ToolContext, payload: Value) -> Finished {
        let result = match self.lookup(request) {
            Ok((call, handler)) => handler.resume(&call, ctx, payload).await,
            Err(e) => Err(e),
        };
        Finished::from_result(result)
    }
}

/// Which optional tools to enable. The human tools are always registered.
#[derive(Debug, Clone, Default)]
pub struct ToolOptions {
    pub web_search: Option<search::WebSearchConfig>,
    /// SQLite database for `sql_query`
    pub database: Option<String>,
    pub max_rows: Option<usize>,
    /// Indexed documents for `knowledge_search`
    pub knowledge: Option<Arc<crate::knowledge::KnowledgeBase>>,
}

impl ToolRegistry {
    pub fn from_options(options: &ToolOptions) -> anyhow::Result<Self> {
        let mut registry = Self::new()
            .with(human::HumanAssistance)?
            .with(human::HumanVerification)?;

        if let Some(config) = &options.web_search {
            registry.register(search::WebSearch::new(config.clone())?)?;
        }
        if let Some(database) = &options.database {
            let mut tool = sql::SqlQuery::new(database)?;
            if let Some(max_rows) = options.max_rows {
                tool = tool.with_max_rows(max_rows);
            }
            registry.register(tool)?;
        }
        if let Some(knowledge) = &options.knowledge {
            registry.register(knowledge::KnowledgeSearch::new(Arc::clone(knowledge)))?;
        }

        tracing::debug!(tools = ?registry.order, "tool registry ready");
        Ok(registry)
    }
}

fn check_required_arguments(tool: &Tool, call: &ToolCall) -> AgentResult<()> {
    let arguments = call.arguments.as_object().ok_or_else(|| {
        AgentError::InvalidParameters(format!("Arguments for {} must be an object", call.name))
    })?;

    let required = tool
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for key in required.iter().filter_map(Value::as_str) {
        if !arguments.contains_key(key) {
            return Err(AgentError::InvalidParameters(format!(
                "Missing required parameter '{}' for {}",
                key, call.name
            )));
        }
    }
    Ok(())
}
