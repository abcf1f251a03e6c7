use anyhow::Result;

use crate::config::AgentArgs;

pub async fn execute(args: &AgentArgs, thread_id: Option<String>, message: String) -> Result<()> {
    // Run is a single headless turn of a session
    let mut session = super::session::build_session(args, thread_id)?;
    session.headless_start(message).await?;
    Ok(())
}
