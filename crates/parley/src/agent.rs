use async_stream::try_stream;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::{RunError, RunResult};
use crate::gateway::ModelGateway;
use crate::knowledge::{render_context, KnowledgeBase};
use crate::models::message::{Message, ToolRequest};
use crate::models::role::Role;
use crate::models::thread::{PendingInterrupt, ThreadState, ThreadSummary};
use crate::prompt_template::render_system_prompt;
use crate::providers::base::FragmentStream;
use crate::store::{validate_thread_id, StateStore, ThreadLease};
use crate::tools::{Execution, Finished, ToolContext, ToolRegistry};

pub const DEFAULT_MAX_TURNS: usize = 25;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. \
Use the available tools when they help you answer accurately, \
and ask a human for help when you cannot find the answer yourself.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model invocations allowed per `run` or `resume` call
    pub max_turns: usize,
    pub instructions: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

/// What starts a round of the loop
#[derive(Debug, Clone)]
pub enum Input {
    Message(String),
    Resume(Value),
}

/// Returned when a tool is waiting on a human
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suspension {
    pub thread_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Outcome {
    Complete(Message),
    Suspended(Suspension),
    /// The loop stopped early; the thread is saved and a new message continues it
    TurnLimitReached { turns: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A message appended to the thread
    Message(Message),
    Finished(Outcome),
}

/// Agent drives the conversation loop for any number of threads
pub struct Agent {
    gateway: ModelGateway,
    tools: ToolRegistry,
    store: Arc<dyn StateStore>,
    config: AgentConfig,
    knowledge: Option<Arc<KnowledgeBase>>,
}

impl Agent {
    pub fn new(
        gateway: ModelGateway,
        tools: ToolRegistry,
        store: Arc<dyn StateStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            gateway,
            tools,
            store,
            config,
            knowledge: None,
        }
    }

    /// Ground [`Agent::chat`] replies in passages retrieved from `knowledge`
    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Claim a thread for the duration of one call. The store decides, so
    /// agents in other processes sharing it are turned away too.
    async fn claim(&self, thread_id: &str) -> RunResult<ThreadLease> {
        Ok(self.store.claim(thread_id).await?)
    }

    async fn commit(&self, thread: &mut ThreadState) -> RunResult<()> {
        thread.updated = Utc::now();
        self.store.put(thread).await?;
        Ok(())
    }

    /// Append a tool result and merge its state updates
    fn apply(thread: &mut ThreadState, call_id: &str, finished: Finished) -> Message {
        thread.state.extend(finished.state);
        let message = Message::tool().with_tool_response(call_id, finished.result);
        thread.messages.push(message.clone());
        message
    }

    fn context(thread: &ThreadState, call_id: &str) -> ToolContext {
        ToolContext::new(thread.thread_id.as_str(), call_id, thread.state.clone())
    }

    /// Create a stream that yields each message as it is appended to the thread,
    /// followed by the outcome of the round.
    ///
    /// State is only written to the store when the round finishes, so an error
    /// leaves the stored thread exactly as it was.
    pub fn reply(
        &self,
        thread_id: impl Into<String>,
        input: Input,
    ) -> BoxStream<'_, RunResult<AgentEvent>> {
        let thread_id = thread_id.into();

        Box::pin(try_stream! {
            validate_thread_id(&thread_id)?;
            let _lease = self.claim(&thread_id).await?;

            let mut thread = self
                .store
                .get(&thread_id)
                .await?
                .unwrap_or_else(|| ThreadState::new(thread_id.as_str()));

            let mut queue: Vec<ToolRequest> = Vec::new();
            match input {
                Input::Message(text) => {
                    let message = match thread.pending {
                        Some(_) => Err(RunError::InterruptPending(thread_id.clone())),
                        None => Ok(Message::user().with_text(text)),
                    }?;
                    thread.messages.push(message.clone());
                    yield AgentEvent::Message(message);
                }
                Input::Resume(payload) => {
                    let pending = thread
                        .pending
                        .take()
                        .ok_or_else(|| RunError::NoPendingInterrupt(thread_id.clone()))?;
                    tracing::info!(thread_id = %thread_id, call_id = %pending.call_id, tool = pending.tool_name(), "resuming");

                    let ctx = Self::context(&thread, &pending.call_id);
                    let finished = self.tools.resume(&pending.tool_call, &ctx, payload).await;
                    yield AgentEvent::Message(Self::apply(&mut thread, &pending.call_id, finished));
                    queue = pending.remaining;
                }
            }

            let tools = self.tools.tools();
            let mut turns = 0;
            loop {
                // Requests run one at a time in the order the model issued them
                let mut requests = std::mem::take(&mut queue).into_iter();
                while let Some(request) = requests.next() {
                    tracing::debug!(thread_id = %thread_id, call_id = %request.id, tool = ?request.tool_name(), "dispatching tool call");
                    let ctx = Self::context(&thread, &request.id);
                    match self.tools.execute(&request, &ctx).await {
                        Execution::Finished(finished) => {
                            yield AgentEvent::Message(Self::apply(&mut thread, &request.id, finished));
                        }
                        Execution::Interrupted(payload) => {
                            let suspension = Suspension {
                                thread_id: thread_id.clone(),
                                call_id: request.id.clone(),
                                tool_name: request.tool_name().unwrap_or_default().to_string(),
                                payload: payload.clone(),
                            };
                            thread.pending = Some(PendingInterrupt {
                                call_id: request.id.clone(),
                                tool_call: request,
                                payload,
                                remaining: requests.by_ref().collect(),
                            });
                            self.commit(&mut thread).await?;
                            tracing::info!(thread_id = %thread_id, call_id = %suspension.call_id, tool = %suspension.tool_name, "suspended awaiting human input");
                            yield AgentEvent::Finished(Outcome::Suspended(suspension));
                            return;
                        }
                    }
                }

                if turns >= self.config.max_turns {
                    self.commit(&mut thread).await?;
                    tracing::warn!(thread_id = %thread_id, turns, "turn limit reached");
                    yield AgentEvent::Finished(Outcome::TurnLimitReached { turns });
                    return;
                }
                turns += 1;

                let system = render_system_prompt(
                    &self.config.instructions,
                    &tools,
                    self.gateway.max_tool_calls(),
                    &thread.state,
                )
                .map_err(|e| RunError::Internal(e.to_string()))?;

                tracing::debug!(thread_id = %thread_id, turn = turns, "invoking model");
                let response = self
                    .gateway
                    .invoke(&system, &thread.messages, &tools)
                    .await
                    .map_err(|e| {
                        tracing::error!(thread_id = %thread_id, error = %e, "model call failed");
                        e
                    })?;

                thread.messages.push(response.clone());
                yield AgentEvent::Message(response.clone());

                if response.is_terminal() {
                    self.commit(&mut thread).await?;
                    yield AgentEvent::Finished(Outcome::Complete(response));
                    return;
                }
                queue = response.tool_requests().cloned().collect();
            }
        })
    }

    async fn drain(mut events: BoxStream<'_, RunResult<AgentEvent>>) -> RunResult<Outcome> {
        while let Some(event) = events.try_next().await? {
            if let AgentEvent::Finished(outcome) = event {
                return Ok(outcome);
            }
        }
        Err(RunError::Internal(
            "conversation ended without an outcome".to_string(),
        ))
    }

    /// Append a user message and run the loop until it completes or suspends
    pub async fn run(&self, thread_id: &str, message: impl Into<String>) -> RunResult<Outcome> {
        Self::drain(self.reply(thread_id, Input::Message(message.into()))).await
    }

    /// Deliver a human's answer to the thread's pending interrupt and continue
    pub async fn resume(&self, thread_id: &str, payload: Value) -> RunResult<Outcome> {
        Self::drain(self.reply(thread_id, Input::Resume(payload))).await
    }

    /// Discard a thread, including any pending interrupt
    pub async fn cancel(&self, thread_id: &str) -> RunResult<bool> {
        let _lease = self.claim(thread_id).await?;
        let removed = self.store.delete(thread_id).await?;
        if removed {
            tracing::info!(thread_id, "thread cancelled");
        }
        Ok(removed)
    }

    pub async fn thread(&self, thread_id: &str) -> RunResult<Option<ThreadState>> {
        Ok(self.store.get(thread_id).await?)
    }

    pub async fn threads(&self) -> RunResult<Vec<ThreadSummary>> {
        Ok(self.store.list().await?)
    }

    /// Stream a plain reply to a caller-held history, without tools or stored state.
    ///
    /// With a knowledge base attached, passages matching the latest user
    /// message are added to the system prompt along with their sources.
    pub async fn chat(&self, history: &[Message]) -> RunResult<FragmentStream> {
        let mut system =
            render_system_prompt(&self.config.instructions, &[], 0, &Default::default())
                .map_err(|e| RunError::Internal(e.to_string()))?;

        let question = history
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(Message::text)
            .filter(|text| !text.trim().is_empty());
        if let (Some(knowledge), Some(question)) = (&self.knowledge, question) {
            let passages = knowledge
                .search(&question, None)
                .await
                .map_err(RunError::Knowledge)?;
            system = format!("{}\n\n{}", system, render_context(&passages));
        }

        Ok(self.gateway.stream(&system, history).await?)
    }
}
