use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parley::agent::{Agent, AgentConfig};
use parley::gateway::ModelGateway;
use parley::models::message::Message;
use parley::models::tool::Tool;
use parley::providers::base::{Provider, Usage};
use parley::store::MemoryStore;
use parley::tools::{ToolOptions, ToolRegistry};
use std::sync::{Arc, Mutex};

use crate::state::AppState;

/// Replays scripted replies in order; `Err` entries fail the call
pub struct MockProvider {
    responses: Mutex<Vec<Result<Message, String>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<Result<Message, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(anyhow!("no scripted response left"));
        }
        match responses.remove(0) {
            Ok(message) => Ok((message, Usage::default())),
            Err(e) => Err(anyhow!(e)),
        }
    }
}

/// Replies with the system prompt it was given and embeds every text alike
pub struct PromptEcho;

#[async_trait]
impl Provider for PromptEcho {
    async fn complete(
        &self,
        system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        Ok((Message::assistant().with_text(system), Usage::default()))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// App state backed by a scripted model, in-memory threads and the human tools
pub fn test_state(responses: Vec<Result<Message, String>>) -> AppState {
    let gateway = ModelGateway::new(Arc::new(MockProvider::new(responses)));
    let tools = ToolRegistry::from_options(&ToolOptions::default()).unwrap();
    AppState::new(Agent::new(
        gateway,
        tools,
        Arc::new(MemoryStore::new()),
        AgentConfig::default(),
    ))
}
