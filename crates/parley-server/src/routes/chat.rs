use crate::routes::reply::SseResponse;
use crate::state::AppState;
use axum::{extract::State, routing::post, Json, Router};
use futures::stream::StreamExt;
use parley::models::message::Message;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn convert_messages(incoming: Vec<ChatMessage>) -> Vec<Message> {
    incoming
        .into_iter()
        .filter_map(|msg| match msg.role.as_str() {
            "user" => Some(Message::user().with_text(msg.content)),
            "assistant" => Some(Message::assistant().with_text(msg.content)),
            _ => {
                tracing::warn!("Unknown role: {}", msg.role);
                None
            }
        })
        .collect()
}

fn format_event(content: &str) -> String {
    format!("data: {}\n\n", json!({ "content": content }))
}

/// Stateless streaming chat over the history the client sends
async fn handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> SseResponse {
    let (tx, rx) = mpsc::channel(100);
    let history = convert_messages(request.messages);

    let agent = state.agent.clone();
    tokio::spawn(async move {
        let mut fragments = match agent.chat(&history).await {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::error!("Failed to start chat stream: {}", e);
                let _ = tx.send(format_event(&format!("Error: {}", e))).await;
                return;
            }
        };

        loop {
            match timeout(Duration::from_millis(500), fragments.next()).await {
                Ok(Some(Ok(fragment))) => {
                    if tx.send(format_event(&fragment)).await.is_err() {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Chat stream failed: {}", e);
                    let _ = tx.send(format_event(&format!("Error: {}", e))).await;
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    if tx.is_closed() {
                        break;
                    }
                }
            }
        }
    });

    SseResponse::new(ReceiverStream::new(rx))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_provider::{test_state, PromptEcho};
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn chat(state: AppState, body: serde_json::Value) -> (StatusCode, String) {
        let response = routes(state)
            .oneshot(
                Request::post("/chat")
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_chat_streams_fragments() {
        let state = test_state(vec![Ok(Message::assistant().with_text("Hello!"))]);

        let (status, body) = chat(
            state,
            json!({"messages": [
                {"role": "system", "content": "ignored"},
                {"role": "user", "content": "Hi"}
            ]}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "data: {\"content\":\"Hello!\"}\n\n");
    }

    #[tokio::test]
    async fn test_chat_reports_errors_inline() {
        let state = test_state(vec![Err("upstream down".to_string())]);

        let (status, body) = chat(state, json!({"messages": [{"role": "user", "content": "Hi"}]})).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("data: {\"content\":\"Error: "));
        assert!(body.contains("upstream down"));
    }

    #[tokio::test]
    async fn test_chat_uses_knowledge_base() {
        use parley::agent::{Agent, AgentConfig};
        use parley::gateway::ModelGateway;
        use parley::knowledge::KnowledgeBase;
        use parley::store::MemoryStore;
        use parley::tools::ToolRegistry;
        use std::sync::Arc;

        let provider = Arc::new(PromptEcho);
        let knowledge = KnowledgeBase::in_memory(provider.clone()).unwrap();
        knowledge
            .add_text("hours.txt", "The shop opens at nine.")
            .await
            .unwrap();
        let agent = Agent::new(
            ModelGateway::new(provider),
            ToolRegistry::new(),
            Arc::new(MemoryStore::new()),
            AgentConfig::default(),
        )
        .with_knowledge(Arc::new(knowledge));

        let (status, body) = chat(
            AppState::new(agent),
            json!({"messages": [{"role": "user", "content": "When do you open?"}]}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Content: The shop opens at nine."));
        assert!(body.contains("Source: hours.txt"));
    }

    #[test]
    fn test_convert_messages_skips_unknown_roles() {
        let history = convert_messages(vec![
            ChatMessage {
                role: "user".to_string(),
                content: "Hi".to_string(),
            },
            ChatMessage {
                role: "system".to_string(),
                content: "Be brief".to_string(),
            },
            ChatMessage {
                role: "assistant".to_string(),
                content: "Hello".to_string(),
            },
        ]);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text(), "Hello");
    }
}
