//! MCP tool discovery
//!
//! Each configured server is connected and queried for its tool list;
//! every discovered tool becomes a registry entry bound to an agent named
//! after the server. Servers that fail to connect are skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::client::McpClient;
use super::config::McpServerConfig;
use super::protocol::McpTool;
use crate::agent::{Agent, AgentRegistry};
use crate::error::Result;
use crate::llm::PromptTemplate;
use crate::tools::{Tool, ToolRegistry, ToolResult};

/// An MCP server tool exposed through the [`Tool`] trait
pub struct McpToolAdapter {
    client: Arc<McpClient>,
    tool: McpTool,
}

impl McpToolAdapter {
    pub fn new(client: Arc<McpClient>, tool: McpTool) -> Self {
        McpToolAdapter { client, tool }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters_schema(&self) -> Value {
        self.tool.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let result = self.client.call_tool(&self.tool.name, args).await?;
        let text = result.text();
        if result.is_error {
            Ok(ToolResult::failure(text))
        } else {
            Ok(ToolResult::success(Value::String(text)))
        }
    }
}

/// Base prompt given to server-backed agents
const SERVER_AGENT_PROMPT: &str = "\
You are the '{{server_name}}' agent. You complete the user's request using \
the tools this server provides, calling them only when needed and never \
repeating a call whose result you already have.

{{memory_context}}";

/// Connect the configured servers, register one agent per server, and
/// return the live clients. Servers that fail to connect or initialize
/// within `init_timeout` are skipped with a warning.
pub async fn discover_agents(
    configs: &[McpServerConfig],
    init_timeout: Duration,
    registry: &mut AgentRegistry,
) -> Result<Vec<Arc<McpClient>>> {
    let mut clients = Vec::new();

    for config in configs {
        let client = match tokio::time::timeout(init_timeout, McpClient::connect(config)).await {
            Ok(Ok(client)) => Arc::new(client),
            Ok(Err(e)) => {
                warn!("Failed to connect to MCP server '{}': {}", config.name, e);
                continue;
            }
            Err(_) => {
                warn!(
                    "MCP server '{}' did not initialize within {:?}",
                    config.name, init_timeout
                );
                continue;
            }
        };

        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!("Failed to list tools for '{}': {}", config.name, e);
                continue;
            }
        };

        let mut tool_registry = ToolRegistry::new();
        let mut tool_names = Vec::new();
        for tool in tools {
            tool_names.push(tool.name.clone());
            tool_registry.register_boxed(Box::new(McpToolAdapter::new(client.clone(), tool)));
        }

        let prompt =
            PromptTemplate::new(SERVER_AGENT_PROMPT.replace("{{server_name}}", &config.name));

        let agent = Agent::builder(&config.name)
            .description(format!(
                "Tools provided by the '{}' MCP server",
                config.name
            ))
            .prompt(prompt)
            .tools(Arc::new(tool_registry))
            .build()?;

        info!(
            "Registered MCP agent '{}' with {} tools: {}",
            config.name,
            tool_names.len(),
            tool_names.join(", ")
        );
        registry.register(agent);
        clients.push(client);
    }

    Ok(clients)
}
