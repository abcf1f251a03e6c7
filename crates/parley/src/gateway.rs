use std::sync::Arc;
use std::time::Duration;

use crate::errors::ModelError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{CompletionOptions, FragmentStream, Provider};

pub const DEFAULT_MAX_TOOL_CALLS: usize = 1;

/// Wraps a provider and enforces the shape of the replies the loop accepts.
///
/// A reply is either terminal text or a message carrying between one and
/// `max_tool_calls` tool requests. Anything else is reported as
/// [`ModelError::Malformed`] so the turn is never committed.
pub struct ModelGateway {
    provider: Arc<dyn Provider>,
    max_tool_calls: usize,
    timeout: Option<Duration>,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            timeout: None,
        }
    }

    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = max_tool_calls.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_tool_calls(&self) -> usize {
        self.max_tool_calls
    }

    pub async fn invoke(
        &self,
        system: &str,
        history: &[Message],
        tools: &[Tool],
    ) -> Result<Message, ModelError> {
        let options = CompletionOptions {
            parallel_tool_calls: self.max_tool_calls > 1,
        };
        let completion = self
            .provider
            .complete_with_options(system, history, tools, options);
        let (message, _usage) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, completion)
                .await
                .map_err(|_| ModelError::Timeout(limit))??,
            None => completion.await?,
        };

        self.validate(&message)?;
        Ok(message)
    }

    pub async fn stream(
        &self,
        system: &str,
        history: &[Message],
    ) -> Result<FragmentStream, ModelError> {
        let opening = self.provider.stream(system, history);
        let fragments = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, opening)
                .await
                .map_err(|_| ModelError::Timeout(limit))??,
            None => opening.await?,
        };
        Ok(fragments)
    }

    fn validate(&self, message: &Message) -> Result<(), ModelError> {
        let requested = message.tool_requests().count();
        if requested > self.max_tool_calls {
            return Err(ModelError::Malformed(format!(
                "model requested {} tool calls, at most {} allowed per turn",
                requested, self.max_tool_calls
            )));
        }
        if requested == 0 && message.text().trim().is_empty() {
            return Err(ModelError::Malformed(
                "model returned neither text nor tool calls".to_string(),
            ));
        }
        Ok(())
    }
}
