use anyhow::Result;
use cliclack::input;
use console::style;
use futures::TryStreamExt;
use parley::agent::Agent;
use parley::models::message::Message;
use std::io::{self, Write};

use crate::config::AgentArgs;

fn is_exit(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "quit" | "exit" | "q" | "/exit" | "/quit"
    )
}

/// Write each fragment as it arrives and return the whole reply
async fn stream_reply<W: Write>(agent: &Agent, history: &[Message], out: &mut W) -> Result<String> {
    let mut fragments = agent.chat(history).await?;
    let mut reply = String::new();
    while let Some(fragment) = fragments.try_next().await? {
        write!(out, "{}", fragment)?;
        out.flush()?;
        reply.push_str(&fragment);
    }
    writeln!(out)?;
    Ok(reply)
}

/// A plain streaming chatbot: no tools, nothing saved
pub async fn execute(args: &AgentArgs) -> Result<()> {
    let agent = args.build_agent()?;
    let mut history: Vec<Message> = Vec::new();

    println!(
        "Parley chat {}",
        style("- type \"exit\" to end the session").dim()
    );

    loop {
        let text: String = input("User").placeholder("").interact()?;
        if is_exit(&text) {
            println!("Goodbye!");
            break;
        }

        history.push(Message::user().with_text(&text));
        print!("{} ", style("Assistant:").bold());
        match stream_reply(&agent, &history, &mut io::stdout()).await {
            Ok(reply) => history.push(Message::assistant().with_text(reply)),
            Err(e) => {
                // Drop the unanswered message so the history stays paired
                history.pop();
                eprintln!("{} {}", style("Error:").red(), e);
            }
        }
    }
    Ok(())
}
