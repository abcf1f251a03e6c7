use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::{Message, ToolRequest};

/// A tool call that is waiting for a human before the thread can continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub call_id: String,
    pub tool_call: ToolRequest,
    /// What the tool asked the human for
    pub payload: Value,
    /// Requests from the same model turn that have not run yet, in issue order
    #[serde(default)]
    pub remaining: Vec<ToolRequest>,
}

impl PendingInterrupt {
    pub fn tool_name(&self) -> &str {
        self.tool_call.tool_name().unwrap_or_default()
    }
}

/// Everything needed to continue a conversation, persisted between calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    pub messages: Vec<Message>,
    /// Values written by tools, such as a verified `name` or `birthday`
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub pending: Option<PendingInterrupt>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl ThreadState {
    pub fn new<S: Into<String>>(thread_id: S) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            state: Map::new(),
            pending: None,
            created: now,
            updated: now,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }

    /// Text of the most recent assistant message with text in it
    pub fn last_reply(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == super::role::Role::Assistant)
            .map(Message::text)
            .find(|text| !text.is_empty())
    }
}

/// Listing entry for a stored thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub message_count: usize,
    pub suspended: bool,
    pub updated: DateTime<Utc>,
}

impl From<&ThreadState> for ThreadSummary {
    fn from(thread: &ThreadState) -> Self {
        Self {
            thread_id: thread.thread_id.clone(),
            message_count: thread.messages.len(),
            suspended: thread.is_suspended(),
            updated: thread.updated,
        }
    }
}
