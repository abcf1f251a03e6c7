use anyhow::Result;

use crate::config::AgentArgs;
use crate::prompt::parse_payload;

/// Answer a suspended thread. Without an answer on the command line the
/// question is asked interactively.
pub async fn execute(args: &AgentArgs, thread_id: String, answer: Option<String>) -> Result<()> {
    let mut session = super::session::build_session(args, Some(thread_id))?;
    session.resume(answer.as_deref().map(parse_payload)).await?;
    Ok(())
}
