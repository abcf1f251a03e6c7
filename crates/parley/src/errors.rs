use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while executing a single tool call. These are recorded in the
/// conversation as the tool result so the model can react to them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Failures of the model gateway. A turn that hits one of these is not committed.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed model response: {0}")]
    Malformed(String),
}

/// Failures of the persisted thread store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid thread id: {0}")]
    InvalidThreadId(String),

    /// Another caller, possibly in another process, holds the thread
    #[error("Thread {0} is locked by another caller")]
    Busy(String),

    #[error("Store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not (de)serialize thread state: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the conversation loop
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(StoreError),

    #[error("Thread {0} has no pending interrupt")]
    NoPendingInterrupt(String),

    #[error("Thread {0} is suspended; resume or cancel it before sending a new message")]
    InterruptPending(String),

    #[error("Thread {0} is already being processed")]
    ThreadBusy(String),

    #[error("Knowledge base lookup failed: {0}")]
    Knowledge(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy(thread_id) => RunError::ThreadBusy(thread_id),
            other => RunError::Store(other),
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;
