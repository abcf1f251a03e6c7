use anyhow::{anyhow, Result};
use futures::StreamExt;
use serde_json::Value;

use crate::prompt::{InputType, Prompt};
use parley::agent::{Agent, AgentEvent, Input as AgentInput, Outcome, Suspension};
use parley::errors::RunError;
use parley::models::message::Message;
use parley::models::role::Role;

#[cfg(test)]
pub mod mock_provider;

pub struct Session<'a> {
    agent: Agent,
    prompt: Box<dyn Prompt + 'a>,
    thread_id: String,
}

impl<'a> Session<'a> {
    pub fn new(agent: Agent, prompt: Box<impl Prompt + 'a>, thread_id: String) -> Self {
        Session {
            agent,
            prompt,
            thread_id,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub async fn start(&mut self) -> Result<()> {
        self.setup_session().await?;

        // A thread saved while waiting on a human continues from its question
        if self.pending().await?.is_some() {
            let resumed = self.resume(None).await;
            self.keep_going(resumed)?;
        }

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = input.content {
                        let replied = self.drive(AgentInput::Message(content), true).await;
                        self.keep_going(replied)?;
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }
        }
        self.close_session();
        Ok(())
    }

    /// In an interactive session a failed round is shown and the user may try again.
    /// Anything that is not an agent error ends the session.
    fn keep_going(&mut self, result: Result<Option<Outcome>>) -> Result<()> {
        match result {
            Ok(_) => Ok(()),
            Err(e) => match e.downcast_ref::<RunError>() {
                Some(run_error) => {
                    self.prompt
                        .render(raw_message(&format!("Error: {}\n", run_error)));
                    Ok(())
                }
                None => Err(e),
            },
        }
    }

    /// Send one message without prompting; a suspension is reported, not answered.
    /// Agent errors are returned to the caller.
    pub async fn headless_start(&mut self, message: String) -> Result<Option<Outcome>> {
        self.drive(AgentInput::Message(message), false).await
    }

    /// Answer the pending interrupt with `payload`, or ask for an answer when none is given
    pub async fn resume(&mut self, payload: Option<Value>) -> Result<Option<Outcome>> {
        match payload {
            Some(payload) => self.drive(AgentInput::Resume(payload), false).await,
            None => {
                let suspension = self.pending().await?.ok_or_else(|| {
                    anyhow!("Thread {} is not waiting for input", self.thread_id)
                })?;
                let payload = self.prompt.ask_human(&suspension)?;
                self.drive(AgentInput::Resume(payload), true).await
            }
        }
    }

    async fn pending(&self) -> Result<Option<Suspension>> {
        let thread = self.agent.thread(&self.thread_id).await?;
        Ok(thread.and_then(|thread| thread.pending).map(|pending| Suspension {
            thread_id: self.thread_id.clone(),
            call_id: pending.call_id.clone(),
            tool_name: pending.tool_name().to_string(),
            payload: pending.payload,
        }))
    }

    /// Feed `input` to the agent. With `ask_human` every suspension is put to the
    /// prompt and the answer fed back until the round ends another way.
    async fn drive(&mut self, input: AgentInput, ask_human: bool) -> Result<Option<Outcome>> {
        let mut next = input;
        loop {
            self.prompt.show_busy();
            let outcome = self.process(next).await;
            self.prompt.hide_busy();

            match outcome? {
                Some(Outcome::Suspended(suspension)) if ask_human => {
                    next = AgentInput::Resume(self.prompt.ask_human(&suspension)?);
                }
                Some(Outcome::Suspended(suspension)) => {
                    self.prompt.render(raw_message(&format!(
                        "Waiting on {}: {}\nAnswer with `parley resume {} <answer>`\n",
                        suspension.tool_name, suspension.payload, self.thread_id
                    )));
                    return Ok(Some(Outcome::Suspended(suspension)));
                }
                Some(Outcome::TurnLimitReached { turns }) => {
                    self.prompt.render(raw_message(&format!(
                        "Stopped after {} model calls without a final answer. Send another message to continue.\n",
                        turns
                    )));
                    return Ok(Some(Outcome::TurnLimitReached { turns }));
                }
                other => return Ok(other),
            }
        }
    }

    /// `Ok(None)` when the user interrupted the round
    async fn process(&mut self, input: AgentInput) -> Result<Option<Outcome>> {
        let mut stream = self.agent.reply(self.thread_id.as_str(), input);
        let mut outcome = None;
        loop {
            tokio::select! {
                event = stream.next() => {
                    match event {
                        Some(Ok(AgentEvent::Message(message))) => {
                            // The user's own words are already on screen
                            if message.role != Role::User {
                                self.prompt.hide_busy();
                                self.prompt.render(Box::new(message));
                            }
                        }
                        Some(Ok(AgentEvent::Finished(finished))) => outcome = Some(finished),
                        Some(Err(e)) => {
                            tracing::error!(thread_id = %self.thread_id, "reply failed: {}", e);
                            return Err(e.into());
                        }
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    drop(stream);
                    // Nothing from an unfinished round is saved
                    self.prompt.render(raw_message(" Interrupt: the thread keeps its last saved state.\n"));
                    return Ok(None);
                }
            }
        }
        Ok(outcome)
    }

    async fn setup_session(&mut self) -> Result<()> {
        let earlier = self
            .agent
            .thread(&self.thread_id)
            .await?
            .map(|thread| thread.messages.len())
            .unwrap_or(0);
        self.prompt.render(raw_message(&format!(
            "Starting session {} ({} earlier messages)\n",
            self.thread_id, earlier
        )));

        let tools: Vec<String> = self
            .agent
            .tools()
            .tools()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        self.prompt
            .render(raw_message(&format!("Tools: {}\n", tools.join(", "))));

        self.prompt.parley_ready();
        Ok(())
    }

    fn close_session(&mut self) {
        self.prompt.render(raw_message(&format!(
            "Closing session. Continue it later with `parley session --thread {}`\n",
            self.thread_id
        )));
        self.prompt.close();
    }
}

fn raw_message(content: &str) -> Box<Message> {
    Box::new(Message::assistant().with_text(content))
}
