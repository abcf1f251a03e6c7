use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use parley::agent::DEFAULT_MAX_TURNS;
use parley::gateway::DEFAULT_MAX_TOOL_CALLS;
use parley::knowledge::DEFAULT_TOP_K;
use parley::providers::{
    configs::{OllamaProviderConfig, OpenAiProviderConfig, ProviderConfig},
    factory::ProviderType,
    ollama, openai,
};
use parley::tools::{search, sql};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
        #[serde(default)]
        embedding_model: Option<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
        #[serde(default)]
        embedding_model: Option<String>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Ollama { .. } => ProviderType::Ollama,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                embedding_model,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                embedding_model,
            }),
            ProviderSettings::Ollama {
                host,
                model,
                temperature,
                max_tokens,
                embedding_model,
            } => ProviderConfig::Ollama(OllamaProviderConfig {
                host,
                model,
                temperature,
                max_tokens,
                embedding_model,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    /// Per model call; unset means no limit
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Path to a file with the system instructions
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tool_calls: default_max_tool_calls(),
            timeout_secs: None,
            instructions: None,
        }
    }
}

/// Without a directory threads are kept in memory only
#[derive(Debug, Default, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolSettings {
    /// Enables `web_search`
    #[serde(default)]
    pub tavily_api_key: Option<String>,
    #[serde(default = "default_tavily_host")]
    pub tavily_host: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// SQLite file; enables `sql_query`
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            tavily_host: default_tavily_host(),
            max_results: default_max_results(),
            database: None,
            max_rows: default_max_rows(),
        }
    }
}

/// Retrieval for `/chat` and the `knowledge_search` tool; off without a database
#[derive(Debug, Deserialize)]
pub struct KnowledgeSettings {
    /// SQLite file holding chunks and their embeddings
    #[serde(default)]
    pub db: Option<String>,
    /// Text files indexed at startup when the database is empty
    #[serde(default)]
    pub docs: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            db: None,
            docs: None,
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub knowledge: KnowledgeSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// Extract `provider.api_key` from "missing field `api_key` for key `provider`"
fn missing_field(error: &str) -> Option<String> {
    let rest = error.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .strip_prefix(" for key `")
        .and_then(|key| key.split_once('`'))
    {
        Some((key, _)) => Some(format!("{}.{}", key, field)),
        None => Some(field.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    openai::OPENAI_MODEL.to_string()
}

fn default_openai_host() -> String {
    openai::OPENAI_HOST.to_string()
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_max_tool_calls() -> usize {
    DEFAULT_MAX_TOOL_CALLS
}

fn default_tavily_host() -> String {
    search::TAVILY_HOST.to_string()
}

fn default_max_results() -> usize {
    search::DEFAULT_MAX_RESULTS
}

fn default_max_rows() -> usize {
    sql::DEFAULT_MAX_ROWS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
