use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;

use parley::models::message::Message;
use parley::models::tool::Tool;
use parley::providers::base::{Provider, Usage};

/// A provider that replays pre-configured replies in order
pub struct MockProvider {
    responses: Mutex<Vec<Result<Message, String>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// `Err` entries fail the matching call
    pub fn scripted(responses: Vec<Result<Message, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            anyhow::bail!("no scripted reply left");
        }
        match responses.remove(0) {
            Ok(message) => Ok((message, Usage::default())),
            Err(e) => Err(anyhow!(e)),
        }
    }
}
