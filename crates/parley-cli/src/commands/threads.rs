use anyhow::{bail, Result};
use console::style;
use parley::models::thread::{ThreadState, ThreadSummary};
use parley::store::StateStore;

use crate::config::AgentArgs;
use crate::prompt::cliclack::CliclackPrompt;
use crate::prompt::Prompt;

fn format_summary(summary: &ThreadSummary) -> String {
    let status = if summary.suspended {
        style("waiting for input").yellow().to_string()
    } else {
        style("idle").dim().to_string()
    };
    format!(
        "{}  {:>3} messages  {}  {}",
        style(&summary.thread_id).bold(),
        summary.message_count,
        summary.updated.format("%Y-%m-%d %H:%M:%S"),
        status
    )
}

fn format_pending(thread: &ThreadState) -> Option<String> {
    thread.pending.as_ref().map(|pending| {
        format!(
            "Waiting on {} ({}): {}",
            pending.tool_name(),
            pending.call_id,
            pending.payload
        )
    })
}

pub async fn list(store: &dyn StateStore) -> Result<()> {
    let summaries = store.list().await?;
    if summaries.is_empty() {
        println!("No saved threads");
    }
    for summary in &summaries {
        println!("{}", format_summary(summary));
    }
    Ok(())
}

pub async fn show(store: &dyn StateStore, thread_id: &str) -> Result<()> {
    let Some(thread) = store.get(thread_id).await? else {
        bail!("Thread {} not found", thread_id);
    };

    let mut prompt = CliclackPrompt::new();
    for message in &thread.messages {
        println!("{}", style(message.role.to_string()).bold().cyan());
        prompt.render(Box::new(message.clone()));
    }
    if !thread.state.is_empty() {
        println!(
            "{} {}",
            style("state").bold(),
            serde_json::Value::Object(thread.state.clone())
        );
    }
    if let Some(pending) = format_pending(&thread) {
        println!("{}", style(pending).yellow());
    }
    Ok(())
}

pub async fn cancel(store: &dyn StateStore, thread_id: &str) -> Result<()> {
    // Refuse while a session or the server is working on the thread
    let _lease = store.claim(thread_id).await?;
    if store.delete(thread_id).await? {
        println!("Cancelled thread {}", thread_id);
        Ok(())
    } else {
        bail!("Thread {} not found", thread_id)
    }
}

pub async fn execute_list(args: &AgentArgs) -> Result<()> {
    list(args.store()?.as_ref()).await
}

pub async fn execute_show(args: &AgentArgs, thread_id: &str) -> Result<()> {
    show(args.store()?.as_ref(), thread_id).await
}

pub async fn execute_cancel(args: &AgentArgs, thread_id: &str) -> Result<()> {
    cancel(args.store()?.as_ref(), thread_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley::models::message::{Message, ToolRequest};
    use parley::models::thread::PendingInterrupt;
    use parley::models::tool::ToolCall;
    use parley::store::FileStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn suspended_thread() -> ThreadState {
        let request = ToolRequest {
            id: "call_1".to_string(),
            tool_call: Ok(ToolCall::new("human_assistance", json!({"query": "Which port?"}))),
        };
        let mut thread = ThreadState::new("t1");
        thread.messages.push(Message::user().with_text("Set up the server"));
        thread.pending = Some(PendingInterrupt {
            call_id: "call_1".to_string(),
            tool_call: request,
            payload: json!({"query": "Which port?"}),
            remaining: vec![],
        });
        thread
    }

    #[test]
    fn test_format_pending() {
        let thread = suspended_thread();
        assert_eq!(
            format_pending(&thread).unwrap(),
            "Waiting on human_assistance (call_1): {\"query\":\"Which port?\"}"
        );
        assert_eq!(format_pending(&ThreadState::new("idle")), None);
    }

    #[test]
    fn test_format_summary() {
        let summary = ThreadSummary::from(&suspended_thread());
        let line = console::strip_ansi_codes(&format_summary(&summary)).to_string();
        assert!(line.starts_with("t1"));
        assert!(line.contains("1 messages"));
        assert!(line.ends_with("waiting for input"));
    }

    #[tokio::test]
    async fn test_cancel() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put(&suspended_thread()).await.unwrap();

        cancel(&store, "t1").await.unwrap();
        assert_eq!(store.get("t1").await.unwrap(), None);
        assert!(cancel(&store, "t1").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_refuses_a_claimed_thread() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put(&suspended_thread()).await.unwrap();

        let running = FileStore::new(dir.path()).unwrap();
        let lease = running.claim("t1").await.unwrap();

        let err = cancel(&store, "t1").await.unwrap_err();
        assert!(err.to_string().contains("locked by another caller"));
        assert!(store.get("t1").await.unwrap().is_some());

        drop(lease);
        cancel(&store, "t1").await.unwrap();
    }
}
