use anyhow::Result;
use parley::agent::{Agent, AgentConfig};
use parley::gateway::ModelGateway;
use parley::knowledge::KnowledgeBase;
use parley::prompt_template::load_prompt_file;
use parley::providers::base::Provider;
use parley::providers::factory;
use parley::store::{FileStore, MemoryStore, StateStore};
use parley::tools::search::WebSearchConfig;
use parley::tools::{ToolOptions, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

use crate::configuration::{KnowledgeSettings, Settings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
}

impl AppState {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(agent),
        }
    }

    /// Wire the provider, tools, knowledge base and store described by the
    /// settings into one agent
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let provider: Arc<dyn Provider + Send + Sync> =
            Arc::from(factory::get_provider(settings.provider.into_config())?);
        let knowledge = open_knowledge(&settings.knowledge, Arc::clone(&provider)).await?;
        let mut gateway = ModelGateway::new(provider)
            .with_max_tool_calls(settings.agent.max_tool_calls);
        if let Some(secs) = settings.agent.timeout_secs {
            gateway = gateway.with_timeout(Duration::from_secs(secs));
        }

        let tools = ToolRegistry::from_options(&ToolOptions {
            web_search: settings.tools.tavily_api_key.map(|api_key| WebSearchConfig {
                host: settings.tools.tavily_host,
                api_key,
                max_results: settings.tools.max_results,
            }),
            database: settings.tools.database,
            max_rows: Some(settings.tools.max_rows),
            knowledge: knowledge.clone(),
        })?;

        let store: Arc<dyn StateStore> = match settings.store.dir {
            Some(dir) => {
                let store = FileStore::new(&dir)?;
                tracing::info!(dir = %store.dir().display(), "persisting threads to disk");
                Arc::new(store)
            }
            None => Arc::new(MemoryStore::new()),
        };

        let mut config = AgentConfig {
            max_turns: settings.agent.max_turns,
            ..Default::default()
        };
        if let Some(path) = settings.agent.instructions {
            config.instructions = load_prompt_file(path, &serde_json::json!({}))?;
        }

        let mut agent = Agent::new(gateway, tools, store, config);
        if let Some(knowledge) = knowledge {
            agent = agent.with_knowledge(knowledge);
        }
        Ok(Self::new(agent))
    }
}

async fn open_knowledge(
    settings: &KnowledgeSettings,
    provider: Arc<dyn Provider + Send + Sync>,
) -> Result<Option<Arc<KnowledgeBase>>> {
    let Some(db) = &settings.db else {
        return Ok(None);
    };
    let knowledge = KnowledgeBase::open(db, provider)?.with_top_k(settings.top_k);
    if let Some(docs) = &settings.docs {
        if knowledge.is_empty().await? {
            let files = knowledge.add_path(docs).await?;
            tracing::info!(docs = %docs, files, "indexed knowledge base");
        }
    }
    Ok(Some(Arc::new(knowledge)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{
        AgentSettings, ProviderSettings, ServerSettings, StoreSettings, ToolSettings,
    };
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_from_settings() {
        let dir = TempDir::new().unwrap();
        let instructions = dir.path().join("instructions.md");
        std::fs::write(&instructions, "Answer like a pirate.").unwrap();

        let settings = Settings {
            server: ServerSettings::default(),
            provider: ProviderSettings::Ollama {
                host: "http://localhost:11434".to_string(),
                model: "qwen2.5:14b".to_string(),
                temperature: None,
                max_tokens: None,
                embedding_model: None,
            },
            agent: AgentSettings {
                max_turns: 3,
                instructions: Some(instructions.to_string_lossy().to_string()),
                ..Default::default()
            },
            store: StoreSettings {
                dir: Some(dir.path().join("threads").to_string_lossy().to_string()),
            },
            tools: ToolSettings::default(),
            knowledge: KnowledgeSettings::default(),
        };

        let state = AppState::from_settings(settings).await.unwrap();
        assert_eq!(state.agent.config().max_turns, 3);
        assert_eq!(state.agent.config().instructions, "Answer like a pirate.");
        assert_eq!(state.agent.tools().tools().len(), 2);
        assert!(dir.path().join("threads").is_dir());
        assert!(state.agent.threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_knowledge_is_indexed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.6, 0.8]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("faq.txt"), "Opening hours are nine to five.").unwrap();

        let settings = || Settings {
            server: ServerSettings::default(),
            provider: ProviderSettings::OpenAi {
                host: server.uri(),
                api_key: "test-key".to_string(),
                model: "gpt-4o".to_string(),
                temperature: None,
                max_tokens: None,
                embedding_model: None,
            },
            agent: AgentSettings::default(),
            store: StoreSettings::default(),
            tools: ToolSettings::default(),
            knowledge: KnowledgeSettings {
                db: Some(dir.path().join("knowledge.db").to_string_lossy().to_string()),
                docs: Some(docs.to_string_lossy().to_string()),
                top_k: 2,
            },
        };

        let state = AppState::from_settings(settings()).await.unwrap();
        let names: Vec<String> = state
            .agent
            .tools()
            .tools()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert!(names.contains(&"knowledge_search".to_string()));

        // A populated database is not indexed again
        AppState::from_settings(settings()).await.unwrap();
    }
}
