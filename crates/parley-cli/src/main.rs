use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod prompt;
mod session;

use config::AgentArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    agent: AgentArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start or continue an interactive session
    Session {
        /// Thread to continue; a new one is started when omitted
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Send one message and print the reply without prompting
    Run {
        #[arg(short, long)]
        thread: Option<String>,

        /// The message to send
        message: String,
    },

    /// Answer a thread that is waiting for human input
    Resume {
        thread: String,

        /// Text answer or JSON object; asked interactively when omitted
        answer: Option<String>,
    },

    /// List saved threads
    Threads,

    /// Print a thread's history and pending question
    Show { thread: String },

    /// Discard a thread and any pending question
    Cancel { thread: String },

    /// Streaming chat without tools or saved state, grounded in --knowledge when given
    Chat,

    /// Manage the knowledge base (--knowledge, default ~/.config/parley/knowledge.db)
    Knowledge {
        #[command(subcommand)]
        command: commands::knowledge::KnowledgeCommand,
    },

    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Session { thread }) => commands::session::execute(&cli.agent, thread).await,
        Some(Command::Run { thread, message }) => {
            commands::run::execute(&cli.agent, thread, message).await
        }
        Some(Command::Resume { thread, answer }) => {
            commands::resume::execute(&cli.agent, thread, answer).await
        }
        Some(Command::Threads) => commands::threads::execute_list(&cli.agent).await,
        Some(Command::Show { thread }) => commands::threads::execute_show(&cli.agent, &thread).await,
        Some(Command::Cancel { thread }) => {
            commands::threads::execute_cancel(&cli.agent, &thread).await
        }
        Some(Command::Chat) => commands::chat::execute(&cli.agent).await,
        Some(Command::Knowledge { command }) => {
            commands::knowledge::execute(&cli.agent, command).await
        }
        Some(Command::Version) => commands::version::execute().await,
        None => commands::session::execute(&cli.agent, None).await,
    }
}
