use crate::routes::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use parley::{
    agent::{AgentEvent, Input, Outcome, Suspension},
    models::content::Content,
    models::message::{Message, MessageContent},
    models::role::Role,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    #[serde(default)]
    thread_id: Option<String>,
    message: String,
}

// Streaming response over a channel of pre-formatted frames
pub struct SseResponse {
    rx: ReceiverStream<String>,
    headers: Vec<(&'static str, String)>,
}

impl SseResponse {
    pub fn new(rx: ReceiverStream<String>) -> Self {
        Self {
            rx,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let mut builder = http::Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive");
        for (name, value) in &self.headers {
            builder = builder.header(*name, value.as_str());
        }

        let body = axum::body::Body::from_stream(self);
        builder
            .body(body)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

// Protocol-specific message formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_else(|_| String::new());
        format!("0:{}\n", encoded_text)
    }

    fn format_tool_call(id: &str, name: &str, args: &Value) -> String {
        // Tool calls start with "9:"
        let tool_call = json!({
            "toolCallId": id,
            "toolName": name,
            "args": args
        });
        format!("9:{}\n", tool_call)
    }

    fn format_tool_response(id: &str, result: &[Content]) -> String {
        // Tool responses start with "a:"
        let response = json!({
            "toolCallId": id,
            "result": result,
        });
        format!("a:{}\n", response)
    }

    fn format_interrupt(suspension: &Suspension) -> String {
        // Data parts start with "2:" and are always an array
        let data = json!([{
            "type": "interrupt",
            "threadId": suspension.thread_id,
            "toolCallId": suspension.call_id,
            "toolName": suspension.tool_name,
            "payload": suspension.payload,
        }]);
        format!("2:{}\n", data)
    }

    fn format_error(message: &str) -> String {
        let encoded = serde_json::to_string(message).unwrap_or_else(|_| String::new());
        format!("3:{}\n", encoded)
    }

    fn format_finish(reason: &str) -> String {
        // Finish messages start with "d:"
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }
}

fn finish_reason(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Complete(_) => "stop",
        Outcome::Suspended(_) => "tool-calls",
        Outcome::TurnLimitReached { .. } => "length",
    }
}

async fn stream_message(
    message: Message,
    tx: &mpsc::Sender<String>,
) -> Result<(), mpsc::error::SendError<String>> {
    match message.role {
        // The client already has its own message
        Role::User => {}
        Role::Tool => {
            for content in message.content {
                if let MessageContent::ToolResponse(response) = content {
                    let result = match response.tool_result {
                        Ok(result) => result,
                        Err(err) => vec![Content::text(format!("Error: {}", err))],
                    };
                    tx.send(ProtocolFormatter::format_tool_response(&response.id, &result))
                        .await?;
                }
            }
        }
        Role::Assistant => {
            for content in message.content {
                match content {
                    MessageContent::ToolRequest(request) => {
                        if let Ok(tool_call) = request.tool_call {
                            tx.send(ProtocolFormatter::format_tool_call(
                                &request.id,
                                &tool_call.name,
                                &tool_call.arguments,
                            ))
                            .await?;
                        } else {
                            // A malformed call still gets an error result, so announce it
                            tx.send(ProtocolFormatter::format_tool_call(
                                &request.id,
                                "invalid name",
                                &json!({}),
                            ))
                            .await?;
                        }
                    }
                    MessageContent::Text(text) => {
                        for line in text.lines() {
                            let modified_line = format!("{}\n", line);
                            tx.send(ProtocolFormatter::format_text(&modified_line))
                                .await?;
                        }
                    }
                    MessageContent::ToolResponse(_) => continue,
                }
            }
        }
    }
    Ok(())
}

fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReplyRequest>,
) -> Result<SseResponse, StatusCode> {
    // Check protocol header (optional in our case)
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let thread_id = request.thread_id.unwrap_or_else(new_thread_id);

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    let agent = state.agent.clone();
    let task_thread_id = thread_id.clone();
    tokio::spawn(async move {
        let mut stream = agent.reply(task_thread_id, Input::Message(request.message));
        let mut reason = "stop";

        loop {
            match timeout(Duration::from_millis(500), stream.next()).await {
                Ok(Some(Ok(AgentEvent::Message(message)))) => {
                    if let Err(e) = stream_message(message, &tx).await {
                        tracing::error!("Error sending message through channel: {}", e);
                        return;
                    }
                }
                Ok(Some(Ok(AgentEvent::Finished(outcome)))) => {
                    reason = finish_reason(&outcome);
                    if let Outcome::Suspended(suspension) = &outcome {
                        let _ = tx.send(ProtocolFormatter::format_interrupt(suspension)).await;
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Error processing message: {}", e);
                    let _ = tx.send(ProtocolFormatter::format_error(&e.to_string())).await;
                    reason = "error";
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    // Heartbeat, used to detect disconnected clients and drop the
                    // round before it commits
                    if tx.is_closed() {
                        tracing::info!("Client disconnected, abandoning reply");
                        return;
                    }
                    continue;
                }
            }
        }

        // Send finish message
        let _ = tx.send(ProtocolFormatter::format_finish(reason)).await;
    });

    Ok(SseResponse::new(stream)
        .with_header("x-vercel-ai-data-stream", "v1")
        .with_header("x-thread-id", thread_id))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(default)]
    thread_id: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResumeRequest {
    thread_id: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    thread_id: String,
    outcome: Outcome,
    /// Final text when the round completed
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
}

impl AskResponse {
    fn new(thread_id: String, outcome: Outcome) -> Self {
        let response = match &outcome {
            Outcome::Complete(message) => Some(message.text()),
            _ => None,
        };
        Self {
            thread_id,
            outcome,
            response,
        }
    }
}

// Run a full round without streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let thread_id = request.thread_id.unwrap_or_else(new_thread_id);
    let outcome = state.agent.run(&thread_id, request.message).await?;
    Ok(Json(AskResponse::new(thread_id, outcome)))
}

async fn resume_handler(
    State(state): State<AppState>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let outcome = state
        .agent
        .resume(&request.thread_id, request.payload)
        .await?;
    Ok(Json(AskResponse::new(request.thread_id, outcome)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/ask", post(ask_handler))
        .route("/resume", post(resume_handler))
        .with_state(state)
}
