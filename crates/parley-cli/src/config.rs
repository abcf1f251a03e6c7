use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use parley::agent::{Agent, AgentConfig, DEFAULT_MAX_TURNS};
use parley::gateway::{ModelGateway, DEFAULT_MAX_TOOL_CALLS};
use parley::knowledge::{KnowledgeBase, DEFAULT_TOP_K};
use parley::prompt_template::load_prompt_file;
use parley::providers::base::Provider;
use parley::providers::configs::{OllamaProviderConfig, OpenAiProviderConfig, ProviderConfig};
use parley::providers::{factory, ollama, openai};
use parley::store::{FileStore, MemoryStore, StateStore};
use parley::tools::search::WebSearchConfig;
use parley::tools::{ToolOptions, ToolRegistry};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum CliProviderVariant {
    OpenAi,
    Ollama,
}

/// Options shared by every command that talks to the agent
#[derive(Args, Debug, Clone)]
pub struct AgentArgs {
    /// Provider option (open-ai or ollama)
    #[arg(short, long, value_enum, default_value = "open-ai")]
    pub provider: CliProviderVariant,

    /// OpenAI API key (can also be set via OPENAI_API_KEY environment variable)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Provider host (can also be set via OPENAI_HOST or OLLAMA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Model to use; defaults to the provider's default model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Tavily API key enabling web search (can also be set via TAVILY_API_KEY)
    #[arg(long)]
    pub tavily_api_key: Option<String>,

    /// SQLite database the agent may query read-only
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Model calls allowed per request
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: usize,

    /// Tool calls the model may issue in one reply
    #[arg(long, default_value_t = DEFAULT_MAX_TOOL_CALLS)]
    pub max_tool_calls: usize,

    /// Seconds to wait for each model call
    #[arg(long)]
    pub timeout: Option<u64>,

    /// File with the system instructions
    #[arg(long)]
    pub instructions: Option<PathBuf>,

    /// Directory for saved threads (default ~/.config/parley/threads)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Keep threads in memory only
    #[arg(long)]
    pub ephemeral: bool,

    /// Knowledge base database; enables knowledge_search and grounds chat replies
    #[arg(long)]
    pub knowledge: Option<PathBuf>,

    /// Embedding model; defaults to the provider's default
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Passages retrieved per knowledge search
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
}

fn config_dir() -> Result<PathBuf> {
    let home_dir = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home_dir.join(".config").join("parley"))
}

pub fn threads_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("threads"))
}

pub fn knowledge_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("knowledge.db"))
}

fn from_env_or(value: &Option<String>, var: &str) -> Option<String> {
    value.clone().or_else(|| env::var(var).ok())
}

impl AgentArgs {
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        Ok(match self.provider {
            CliProviderVariant::OpenAi => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host: from_env_or(&self.host, "OPENAI_HOST")
                    .unwrap_or_else(|| openai::OPENAI_HOST.to_string()),
                api_key: from_env_or(&self.api_key, "OPENAI_API_KEY").context(
                    "API key must be provided via --api-key or OPENAI_API_KEY environment variable",
                )?,
                model: self
                    .model
                    .clone()
                    .unwrap_or_else(|| openai::OPENAI_MODEL.to_string()),
                temperature: None,
                max_tokens: None,
                embedding_model: self.embedding_model.clone(),
            }),
            CliProviderVariant::Ollama => ProviderConfig::Ollama(OllamaProviderConfig {
                host: from_env_or(&self.host, "OLLAMA_HOST")
                    .unwrap_or_else(|| ollama::OLLAMA_HOST.to_string()),
                model: self
                    .model
                    .clone()
                    .unwrap_or_else(|| ollama::OLLAMA_MODEL.to_string()),
                temperature: None,
                max_tokens: None,
                embedding_model: self.embedding_model.clone(),
            }),
        })
    }

    fn provider(&self) -> Result<Arc<dyn Provider + Send + Sync>> {
        Ok(Arc::from(factory::get_provider(self.provider_config()?)?))
    }

    /// Open the knowledge base at `path`, or the default location when none is given
    pub fn open_knowledge(&self, path: Option<&PathBuf>) -> Result<KnowledgeBase> {
        let path = match path {
            Some(path) => path.clone(),
            None => knowledge_path()?,
        };
        Ok(KnowledgeBase::open(path, self.provider()?)?.with_top_k(self.top_k))
    }

    fn knowledge_base(&self) -> Result<Option<Arc<KnowledgeBase>>> {
        match &self.knowledge {
            Some(path) => Ok(Some(Arc::new(self.open_knowledge(Some(path))?))),
            None => Ok(None),
        }
    }

    pub fn tool_options(&self) -> ToolOptions {
        ToolOptions {
            web_search: from_env_or(&self.tavily_api_key, "TAVILY_API_KEY")
                .map(WebSearchConfig::new),
            database: self
                .database
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
            max_rows: None,
            knowledge: None,
        }
    }

    pub fn store(&self) -> Result<Arc<dyn StateStore>> {
        if self.ephemeral {
            return Ok(Arc::new(MemoryStore::new()));
        }
        let dir = match &self.store_dir {
            Some(dir) => dir.clone(),
            None => threads_dir()?,
        };
        Ok(Arc::new(FileStore::new(dir)?))
    }

    pub fn agent_config(&self) -> Result<AgentConfig> {
        let mut config = AgentConfig {
            max_turns: self.max_turns,
            ..Default::default()
        };
        if let Some(path) = &self.instructions {
            config.instructions = load_prompt_file(path.clone(), &serde_json::json!({}))?;
        }
        Ok(config)
    }

    pub fn gateway(&self) -> Result<ModelGateway> {
        let mut gateway = ModelGateway::new(self.provider()?).with_max_tool_calls(self.max_tool_calls);
        if let Some(secs) = self.timeout {
            gateway = gateway.with_timeout(Duration::from_secs(secs));
        }
        Ok(gateway)
    }

    pub fn build_agent(&self) -> Result<Agent> {
        let knowledge = self.knowledge_base()?;
        let tools = ToolRegistry::from_options(&ToolOptions {
            knowledge: knowledge.clone(),
            ..self.tool_options()
        })?;
        tracing::debug!(provider = ?self.provider, tools = tools.tools().len(), "building agent");
        let agent = Agent::new(
            self.gateway()?,
            tools,
            self.store()?,
            self.agent_config()?,
        );
        Ok(match knowledge {
            Some(knowledge) => agent.with_knowledge(knowledge),
            None => agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        agent: AgentArgs,
    }

    fn parse(args: &[&str]) -> AgentArgs {
        TestCli::parse_from(std::iter::once("parley").chain(args.iter().copied())).agent
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.provider, CliProviderVariant::OpenAi);
        assert_eq!(args.max_turns, 25);
        assert_eq!(args.max_tool_calls, 1);
        assert_eq!(args.top_k, 3);
        assert!(args.knowledge.is_none());
        assert!(!args.ephemeral);
    }

    #[test]
    fn test_ollama_config() {
        let args = parse(&["--provider", "ollama", "--host", "http://gpu:11434", "-m", "llama3"]);
        match args.provider_config().unwrap() {
            ProviderConfig::Ollama(config) => {
                assert_eq!(config.host, "http://gpu:11434");
                assert_eq!(config.model, "llama3");
            }
            other => panic!("Expected Ollama config, got {:?}", other),
        }
    }

    #[test]
    fn test_openai_key_from_flag() {
        let args = parse(&["--api-key", "sk-test", "--embedding-model", "text-embedding-3-large"]);
        match args.provider_config().unwrap() {
            ProviderConfig::OpenAi(config) => {
                assert_eq!(config.api_key, "sk-test");
                assert_eq!(config.model, openai::OPENAI_MODEL);
                assert_eq!(config.embedding_model.as_deref(), Some("text-embedding-3-large"));
            }
            other => panic!("Expected OpenAI config, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_agent_with_file_store() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("threads");
        let args = parse(&[
            "--provider",
            "ollama",
            "--max-turns",
            "4",
            "--store-dir",
            store_dir.to_str().unwrap(),
        ]);

        let agent = args.build_agent().unwrap();
        assert_eq!(agent.config().max_turns, 4);
        assert!(store_dir.is_dir());
        assert!(agent.threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_agent_with_knowledge() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("kb").join("knowledge.db");
        let args = parse(&[
            "--provider",
            "ollama",
            "--ephemeral",
            "--knowledge",
            db.to_str().unwrap(),
            "--top-k",
            "5",
        ]);

        let agent = args.build_agent().unwrap();
        let names: Vec<String> = agent.tools().tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["human_assistance", "human_verification", "knowledge_search"]
        );
        assert!(db.is_file());
    }
}
