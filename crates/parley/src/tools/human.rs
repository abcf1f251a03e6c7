use async_trait::async_trait;
use indoc::indoc;
use serde_json::{json, Value};

use super::{ToolContext, ToolHandler, ToolOutcome, ToolOutput};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

/// Hands a free-form question to a human and returns their `data` answer
#[derive(Debug, Default, Clone)]
pub struct HumanAssistance;

#[async_trait]
impl ToolHandler for HumanAssistance {
    fn tool(&self) -> Tool {
        Tool::new(
            "human_assistance",
            "Request assistance from a human.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question to put to the human expert."
                    }
                }
            }),
        )
    }

    async fn call(&self, call: &ToolCall, _ctx: &ToolContext) -> AgentResult<ToolOutcome> {
        let query = call
            .str_arg("query")
            .ok_or_else(|| AgentError::InvalidParameters("'query' must be a string".into()))?;
        Ok(ToolOutcome::Interrupt(json!({ "query": query })))
    }

    async fn resume(
        &self,
        _call: &ToolCall,
        _ctx: &ToolContext,
        payload: Value,
    ) -> AgentResult<ToolOutput> {
        match payload.get("data") {
            Some(Value::String(answer)) => Ok(ToolOutput::text(answer.clone())),
            Some(other) => Ok(ToolOutput::text(other.to_string())),
            None => Err(AgentError::InvalidParameters(
                "resume payload must contain 'data'".into(),
            )),
        }
    }
}

/// Asks a human to confirm or correct a name and birthday.
///
/// The confirmed values are written to the thread state under `name` and
/// `birthday`.
#[derive(Debug, Default, Clone)]
pub struct HumanVerification;

impl HumanVerification {
    fn details(call: &ToolCall) -> AgentResult<(String, String)> {
        let name = call
            .str_arg("name")
            .ok_or_else(|| AgentError::InvalidParameters("'name' must be a string".into()))?;
        let birthday = call
            .str_arg("birthday")
            .ok_or_else(|| AgentError::InvalidParameters("'birthday' must be a string".into()))?;
        Ok((name.to_string(), birthday.to_string()))
    }
}

#[async_trait]
impl ToolHandler for HumanVerification {
    fn tool(&self) -> Tool {
        Tool::new(
            "human_verification",
            indoc! {"
                Ask a human to review a name and birthday before relying on them.
                The human either confirms the details or supplies corrections.
            "},
            json!({
                "type": "object",
                "required": ["name", "birthday"],
                "properties": {
                    "name": {"type": "string"},
                    "birthday": {"type": "string"}
                }
            }),
        )
    }

    async fn call(&self, call: &ToolCall, _ctx: &ToolContext) -> AgentResult<ToolOutcome> {
        let (name, birthday) = Self::details(call)?;
        Ok(ToolOutcome::Interrupt(json!({
            "question": "Is this correct?",
            "name": name,
            "birthday": birthday,
        })))
    }

    async fn resume(
        &self,
        call: &ToolCall,
        _ctx: &ToolContext,
        payload: Value,
    ) -> AgentResult<ToolOutput> {
        let (name, birthday) = Self::details(call)?;

        let confirmed = payload
            .get("correct")
            .and_then(Value::as_str)
            .map(|answer| answer.to_lowercase().starts_with('y'))
            .unwrap_or(false);

        let (verified_name, verified_birthday, response) = if confirmed {
            (name, birthday, "Correct".to_string())
        } else {
            let pick = |key: &str, fallback: String| {
                payload
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(fallback)
            };
            (
                pick("name", name),
                pick("birthday", birthday),
                format!("Made a correction: {}", payload),
            )
        };

        Ok(ToolOutput::text(response)
            .with_state("name", json!(verified_name))
            .with_state("birthday", json!(verified_birthday)))
    }
}
