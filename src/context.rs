//! Explicit runtime context
//!
//! Owns the LLM client, agent registry, memory, process monitor, and
//! history store for one run. Entry points construct the context and
//! thread it down; nothing in the crate reaches for globals.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::AgentRegistry;
use crate::config::OverseerConfig;
use crate::delegate::DelegatePipeline;
use crate::error::Result;
use crate::history::ConversationStore;
use crate::llm::{LlmClient, ModelProvider, OpenRouterProvider};
use crate::mcp::{discover_agents, load_server_configs, McpClient};
use crate::memory::{SemanticMemory, VectorStoreBackend};
use crate::process::ProcessMonitor;

/// Shared runtime context for one session
pub struct Context {
    pub config: OverseerConfig,
    pub client: Arc<LlmClient>,
    pub agents: Arc<AgentRegistry>,
    pub memory: Option<Arc<SemanticMemory>>,
    pub processes: ProcessMonitor,
    pub history: Option<ConversationStore>,
    /// Live MCP server connections backing the registered agents
    mcp_clients: Vec<Arc<McpClient>>,
}

impl Context {
    /// Construct the full context: provider from environment credentials,
    /// MCP agent discovery, and optional memory and history backends.
    pub async fn initialize(config: OverseerConfig) -> Result<Self> {
        let provider: Arc<dyn ModelProvider> =
            Arc::new(OpenRouterProvider::from_env(&config.llm)?);
        Self::with_provider(config, provider).await
    }

    /// Construct the context with an explicit model provider
    pub async fn with_provider(
        config: OverseerConfig,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<Self> {
        let client = Arc::new(LlmClient::new(provider, config.llm.clone()));

        let mut agents = AgentRegistry::new();
        let mut mcp_clients = Vec::new();
        let mcp_path = Path::new(&config.mcp.config_path);
        if mcp_path.exists() {
            let server_configs = load_server_configs(mcp_path)?;
            mcp_clients =
                discover_agents(&server_configs, config.mcp.init_timeout, &mut agents).await?;
        } else {
            info!(
                "No MCP configuration at {}; starting with an empty agent registry",
                config.mcp.config_path
            );
        }

        let memory = config.memory.store_url.as_ref().map(|url| {
            Arc::new(SemanticMemory::new(
                Arc::new(VectorStoreBackend::new(url.clone(), config.pool.clone())),
                config.memory.clone(),
            ))
        });

        let history = match config.storage.database_url {
            Some(_) => match ConversationStore::connect(&config.storage).await {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!("History persistence unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Context {
            processes: ProcessMonitor::new(config.process.max_buffer_lines),
            client,
            agents: Arc::new(agents),
            memory,
            history,
            mcp_clients,
            config,
        })
    }

    /// Number of connected MCP servers
    pub fn mcp_server_count(&self) -> usize {
        self.mcp_clients.len()
    }

    /// Build a delegation pipeline over this context
    pub fn pipeline(&self) -> Arc<DelegatePipeline> {
        DelegatePipeline::new(
            self.client.clone(),
            self.agents.clone(),
            self.memory.clone(),
            self.config.tasks.clone(),
        )
    }

    /// Tear down supervised processes
    pub async fn shutdown(&self) {
        self.processes
            .stop_all(self.config.process.stop_timeout)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullProvider;

    #[async_trait]
    impl ModelProvider for NullProvider {
        async fn generate(&self, _system_prompt: &str, _user_query: &str) -> Result<String> {
            Ok(r#"{"response": "ok"}"#.to_string())
        }
        fn model(&self) -> &str {
            "null"
        }
    }

    #[tokio::test]
    async fn test_context_builds_without_external_services() {
        let config = OverseerConfig::default();
        let context = Context::with_provider(config, Arc::new(NullProvider))
            .await
            .unwrap();

        assert!(context.agents.is_empty());
        assert!(context.memory.is_none());
        assert!(context.history.is_none());
        assert_eq!(context.mcp_server_count(), 0);

        // A pipeline can still be constructed over an empty registry
        let _pipeline = context.pipeline();
        context.shutdown().await;
    }
}
