use anyhow::{bail, Result};
use clap::Subcommand;
use console::style;
use parley::knowledge::{KnowledgeBase, Passage, SourceSummary};
use std::path::PathBuf;

use crate::config::AgentArgs;

#[derive(Subcommand, Debug)]
pub enum KnowledgeCommand {
    /// Index text files, or every .txt file under a directory
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show the passages closest to a query
    Search {
        query: String,

        /// Passages to show; defaults to --top-k
        #[arg(short)]
        k: Option<usize>,
    },

    /// List indexed documents
    List,
}

fn format_passage(rank: usize, passage: &Passage) -> String {
    format!(
        "{} {} {}\n{}",
        style(format!("{}.", rank)).bold(),
        style(format!("{} (chunk {})", passage.source, passage.chunk)).cyan(),
        style(format!("score {:.3}", passage.score)).dim(),
        passage.content
    )
}

fn format_source(summary: &SourceSummary) -> String {
    format!("{}  {:>3} chunks", style(&summary.source).bold(), summary.chunks)
}

pub async fn add(knowledge: &KnowledgeBase, paths: &[PathBuf]) -> Result<usize> {
    let mut files = 0;
    for path in paths {
        if !path.exists() {
            bail!("{} does not exist", path.display());
        }
        files += knowledge.add_path(path).await?;
    }
    Ok(files)
}

pub async fn execute(args: &AgentArgs, command: KnowledgeCommand) -> Result<()> {
    let knowledge = args.open_knowledge(args.knowledge.as_ref())?;
    match command {
        KnowledgeCommand::Add { paths } => {
            let files = add(&knowledge, &paths).await?;
            println!("Indexed {} file(s)", files);
        }
        KnowledgeCommand::Search { query, k } => {
            let passages = knowledge.search(&query, k).await?;
            if passages.is_empty() {
                println!("The knowledge base is empty");
            }
            for (i, passage) in passages.iter().enumerate() {
                println!("{}\n", format_passage(i + 1, passage));
            }
        }
        KnowledgeCommand::List => {
            let sources = knowledge.sources().await?;
            if sources.is_empty() {
                println!("No indexed documents");
            }
            for summary in &sources {
                println!("{}", format_source(summary));
            }
        }
    }
    Ok(())
}
