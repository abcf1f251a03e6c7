use super::base::{CompletionOptions, FragmentStream, Provider, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::{
    create_openai_embeddings_payload, create_openai_request_payload, get_usage,
    openai_embeddings_response, openai_fragment_stream, openai_response_to_message,
};
use crate::models::message::Message;
use crate::models::tool::Tool;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5:14b";
pub const OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Talks to the OpenAI compatible endpoint exposed by an Ollama server
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1/{}",
            self.config.host.trim_end_matches('/'),
            endpoint
        );

        let response = self.client.post(&url).json(payload).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => Err(anyhow!("Request failed: {}\nPayload: {}", status, payload)),
        }
    }

    fn payload(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        options: CompletionOptions,
    ) -> Result<Value> {
        create_openai_request_payload(
            &self.config.model,
            system,
            messages,
            tools,
            self.config.temperature,
            self.config.max_tokens,
            options,
        )
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.complete_with_options(system, messages, tools, CompletionOptions::default())
            .await
    }

    async fn complete_with_options(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        options: CompletionOptions,
    ) -> Result<(Message, Usage)> {
        let payload = self.payload(system, messages, tools, options)?;
        let response: Value = self.post("chat/completions", &payload).await?.json().await?;
        if let Some(error) = response.get("error") {
            return Err(anyhow!("Ollama API error: {}", error));
        }

        let message = openai_response_to_message(response.clone())?;
        Ok((message, get_usage(&response)))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .config
            .embedding_model
            .as_deref()
            .unwrap_or(OLLAMA_EMBEDDING_MODEL);
        let payload = create_openai_embeddings_payload(model, texts);
        let response: Value = self.post("embeddings", &payload).await?.json().await?;
        if let Some(error) = response.get("error") {
            return Err(anyhow!("Ollama API error: {}", error));
        }
        openai_embeddings_response(&response, texts.len())
    }

    async fn stream(&self, system: &str, messages: &[Message]) -> Result<FragmentStream> {
        let mut payload = self.payload(system, messages, &[], CompletionOptions::default())?;
        payload["stream"] = json!(true);
        Ok(openai_fragment_stream(
            self.post("chat/completions", &payload).await?,
        ))
    }
}
