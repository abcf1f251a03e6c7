use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{CompletionOptions, FragmentStream, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_openai_context_length_error, create_openai_embeddings_payload,
    create_openai_request_payload, get_usage, openai_embeddings_response, openai_fragment_stream,
    openai_response_to_message,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";
pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/v1/{}", self.config.host.trim_end_matches('/'), endpoint)
    }

    async fn send(&self, endpoint: &str, payload: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(endpoint))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Request failed: {}\nBody: {}", status, body))
            }
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
impl Provider for OpenAiProvider {
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
        let response: Value = self.send("chat/completions", &payload).await?.json().await?;

        // Raise specific error if context length is exceeded
        if let Some(error) = response.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err.into());
            }
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let message = openai_response_to_message(response.clone())?;
        let usage = get_usage(&response);
        tracing::debug!(?usage, "openai completion");

        Ok((message, usage))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .config
            .embedding_model
            .as_deref()
            .unwrap_or(OPENAI_EMBEDDING_MODEL);
        let payload = create_openai_embeddings_payload(model, texts);
        let response: Value = self.send("embeddings", &payload).await?.json().await?;
        if let Some(error) = response.get("error") {
            return Err(anyhow!("OpenAI API error: {}", error));
        }
        openai_embeddings_response(&response, texts.len())
    }

    async fn stream(&self, system: &str, messages: &[Message]) -> Result<FragmentStream> {
        let mut payload = self.payload(system, messages, &[], CompletionOptions::default())?;
        payload["stream"] = json!(true);
        let response = self.send("chat/completions", &payload).await?;
        Ok(openai_fragment_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageContent;
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn _setup_mock_server(response: ResponseTemplate) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        // Create the OpenAiProvider with the mock server's URL as the host
        let config = OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
            embedding_model: None,
        };

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });

        let (_server, provider) =
            _setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let messages = vec![Message::user().with_text("Hello?")];
        let (message, usage) = provider
            .complete("You are a helpful assistant.", &messages, &[])
            .await?;

        if let MessageContent::Text(text) = &message.content[0] {
            assert_eq!(text, "Hello! How can I assist you today?");
        } else {
            panic!("Expected Text content");
        }
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(usage.total_tokens, Some(27));

        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_request() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "human_assistance",
                            "arguments": "{\"query\":\"How do I build an agent?\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 15,
                "total_tokens": 35
            }
        });

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"parallel_tool_calls": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
            embedding_model: None,
        })?;

        let messages = vec![Message::user().with_text("I need expert guidance")];
        let tool = Tool::new(
            "human_assistance",
            "Request assistance from a human.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"}
                },
                "required": ["query"]
            }),
        );

        let (message, usage) = provider
            .complete("You are a helpful assistant.", &messages, &[tool])
            .await?;

        let request = message.tool_requests().next().expect("tool request");
        let tool_call = request.tool_call.as_ref().unwrap();
        assert_eq!(request.id, "call_123");
        assert_eq!(tool_call.name, "human_assistance");
        assert_eq!(
            tool_call.arguments,
            json!({"query": "How do I build an agent?"})
        );
        assert_eq!(usage.total_tokens, Some(35));

        Ok(())
    }

    #[tokio::test]
    async fn test_relaxed_limit_allows_parallel_calls() -> Result<()> {
        let response_body = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Done"},
                "finish_reason": "stop"
            }]
        });
        let (server, provider) =
            _setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let tool = Tool::new("web_search", "Search", json!({"type": "object"}));
        provider
            .complete_with_options(
                "system",
                &[Message::user().with_text("hi")],
                &[tool],
                CompletionOptions {
                    parallel_tool_calls: true,
                },
            )
            .await?;

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body)?;
        assert!(body.get("tools").is_some());
        assert!(body.get("parallel_tool_calls").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_embed() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"model": OPENAI_EMBEDDING_MODEL})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "model": OPENAI_EMBEDDING_MODEL
            })))
            .mount(&mock_server)
            .await;
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
            embedding_model: None,
        })?;

        let vectors = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await?;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let (_server, provider) = _setup_mock_server(ResponseTemplate::new(503)).await;

        let result = provider
            .complete("system", &[Message::user().with_text("hi")], &[])
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Server error: 503"));
    }

    #[tokio::test]
    async fn test_stream_fragments() -> Result<()> {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Pa\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ris\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (_server, provider) = _setup_mock_server(
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .await;

        let fragments: Vec<String> = provider
            .stream("system", &[Message::user().with_text("Capital of France?")])
            .await?
            .try_collect()
            .await?;

        assert_eq!(fragments, vec!["Pa".to_string(), "ris".to_string()]);
        Ok(())
    }
}
