//! Agent model and registry
//!
//! An agent is a named capability provider: a prompt with a declared output
//! schema, a tool registry, and an environment contract. Agents are
//! constructed once at registration and immutable thereafter; "behavior"
//! lives entirely in the prompt text and the tool registry.

mod response;

pub use response::{AgentResponse, Diagnostics};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::llm::PromptTemplate;
use crate::tools::ToolRegistry;

/// A configurable, tool-augmented agent
#[derive(Debug)]
pub struct Agent {
    /// Unique name within a registry
    pub name: String,
    /// Short capability summary
    pub description: String,
    /// Prompt template defining the agent's behavior
    pub prompt: PromptTemplate,
    /// Tools this agent may call
    pub tools: Option<Arc<ToolRegistry>>,
    /// Whether the agent can handle multiple operations in one request
    pub supports_multiple_operations: bool,
    /// Environment variables that must exist at construction
    pub required_env: Vec<String>,
    /// Response field holding follow-up queries, if the agent declares one
    pub follow_up_key: Option<String>,
}

impl Agent {
    /// Start building an agent
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            description: String::new(),
            prompt: None,
            tools: None,
            supports_multiple_operations: true,
            required_env: Vec::new(),
            follow_up_key: None,
        }
    }

    /// Detailed description including the agent's tool names
    pub fn full_description(&self) -> String {
        let mut desc = format!("{}: {}", self.name, self.description);
        if let Some(ref tools) = self.tools {
            let names = tools.sorted_names();
            if !names.is_empty() {
                desc.push_str(&format!("\n\nTools: {}", names.join(", ")));
            }
        }
        desc
    }
}

/// Builder validating the environment contract at construction
pub struct AgentBuilder {
    name: String,
    description: String,
    prompt: Option<PromptTemplate>,
    tools: Option<Arc<ToolRegistry>>,
    supports_multiple_operations: bool,
    required_env: Vec<String>,
    follow_up_key: Option<String>,
}

impl AgentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn supports_multiple_operations(mut self, value: bool) -> Self {
        self.supports_multiple_operations = value;
        self
    }

    pub fn required_env(mut self, vars: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_env = vars.into_iter().map(Into::into).collect();
        self
    }

    pub fn follow_up_key(mut self, key: impl Into<String>) -> Self {
        self.follow_up_key = Some(key.into());
        self
    }

    /// Finish construction, verifying every declared environment variable
    /// exists.
    pub fn build(self) -> Result<Agent> {
        for var in &self.required_env {
            if std::env::var_os(var).is_none() {
                return Err(Error::MissingEnvironment(var.clone()));
            }
        }

        Ok(Agent {
            name: self.name,
            description: self.description,
            prompt: self.prompt.unwrap_or_default(),
            tools: self.tools,
            supports_multiple_operations: self.supports_multiple_operations,
            required_env: self.required_env,
            follow_up_key: self.follow_up_key,
        })
    }
}

/// Registry of agents available to a delegation run
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<Agent>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent; a duplicate name replaces the previous entry
    pub fn register(&mut self, agent: Agent) {
        if self.agents.contains_key(&agent.name) {
            warn!("Replacing already-registered agent '{}'", agent.name);
        } else {
            self.order.push(agent.name.clone());
        }
        self.agents.insert(agent.name.clone(), Arc::new(agent));
    }

    /// Look up an agent by name
    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    /// All agents in registration order
    pub fn all(&self) -> Vec<Arc<Agent>> {
        self.order
            .iter()
            .filter_map(|name| self.agents.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolResult};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct NoopTool(&'static str);

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "noop"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> crate::Result<ToolResult> {
            Ok(ToolResult::success("ok"))
        }
    }

    #[test]
    fn test_builder_defaults() {
        let agent = Agent::builder("tester")
            .description("Runs tests")
            .build()
            .unwrap();
        assert_eq!(agent.name, "tester");
        assert!(agent.supports_multiple_operations);
        assert!(agent.tools.is_none());
        assert!(agent.follow_up_key.is_none());
    }

    #[test]
    fn test_missing_environment_variable() {
        let result = Agent::builder("needy")
            .required_env(["OVERSEER_TEST_SURELY_UNSET_VAR"])
            .build();
        match result {
            Err(Error::MissingEnvironment(var)) => {
                assert_eq!(var, "OVERSEER_TEST_SURELY_UNSET_VAR")
            }
            other => panic!("expected MissingEnvironment, got {other:?}"),
        }
    }

    #[test]
    fn test_full_description_lists_tools() {
        let mut tools = ToolRegistry::new();
        tools.register(NoopTool("web_scrape"));
        tools.register(NoopTool("file_read"));

        let agent = Agent::builder("scraper")
            .description("Fetches pages")
            .tools(Arc::new(tools))
            .build()
            .unwrap();

        let desc = agent.full_description();
        assert!(desc.starts_with("scraper: Fetches pages"));
        assert!(desc.contains("Tools: file_read, web_scrape"));
    }

    #[test]
    fn test_registry_order_and_lookup() {
        let mut registry = AgentRegistry::new();
        registry.register(Agent::builder("b").build().unwrap());
        registry.register(Agent::builder("a").build().unwrap());

        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());

        let names: Vec<String> = registry.all().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
