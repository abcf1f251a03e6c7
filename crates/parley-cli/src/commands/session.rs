use anyhow::Result;

use crate::config::AgentArgs;
use crate::prompt::cliclack::CliclackPrompt;
use crate::session::Session;

pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn build_session(args: &AgentArgs, thread_id: Option<String>) -> Result<Session<'static>> {
    let agent = args.build_agent()?;
    let thread_id = thread_id.unwrap_or_else(new_thread_id);
    Ok(Session::new(agent, Box::new(CliclackPrompt::new()), thread_id))
}

pub async fn execute(args: &AgentArgs, thread_id: Option<String>) -> Result<()> {
    let mut session = build_session(args, thread_id)?;
    tracing::info!(thread_id = session.thread_id(), "starting interactive session");
    session.start().await
}
