use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// A lazy, finite sequence of text fragments from a streaming completion
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Per-call settings the gateway passes down to a provider
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionOptions {
    /// Whether the model may return several tool calls in one reply
    pub parallel_tool_calls: bool,
}

/// Base trait for AI providers (OpenAI, Ollama, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the conversation, optionally requesting tools
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Like [`Provider::complete`], honouring the gateway's per-call options.
    /// Providers without such settings ignore them.
    async fn complete_with_options(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        _options: CompletionOptions,
    ) -> Result<(Message, Usage)> {
        self.complete(system, messages, tools).await
    }

    /// Embed each text as a vector, in input order
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(anyhow::anyhow!("This provider does not support embeddings"))
    }

    /// Stream the text of the next assistant message as it is generated.
    ///
    /// Providers without native streaming yield the whole completion as a single fragment.
    async fn stream(&self, system: &str, messages: &[Message]) -> Result<FragmentStream> {
        let (message, _) = self.complete(system, messages, &[]).await?;
        let text = message.text();
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}
