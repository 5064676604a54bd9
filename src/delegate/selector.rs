//! Agent routing
//!
//! One LLM call pairs tasks with agents from the registry; pairings bind
//! the agent name onto the task. Tasks with no valid pairing come back
//! unassigned.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::Agent;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::prompts::{
    build_router_prompt, build_selector_prompt, router_kwargs, selector_kwargs, RouterSelection,
    SingleSelection,
};
use crate::tasks::Task;

/// Routes tasks (or a single query) to the best-suited agents
pub struct AgentSelector {
    client: Arc<LlmClient>,
}

impl AgentSelector {
    pub fn new(client: Arc<LlmClient>) -> Self {
        AgentSelector { client }
    }

    /// Select the single most appropriate agent for a one-shot query
    pub async fn select_agent(
        &self,
        user_query: &str,
        agents: &[Arc<Agent>],
    ) -> Result<Option<Arc<Agent>>> {
        let selection: SingleSelection = self
            .client
            .call(
                user_query,
                &build_selector_prompt(),
                &selector_kwargs(agents),
            )
            .await?;

        Ok(selection.selected_agent.and_then(|name| {
            agents
                .iter()
                .find(|agent| agent.name == name)
                .cloned()
                .or_else(|| {
                    warn!("Router selected unknown agent '{}'", name);
                    None
                })
        }))
    }

    /// Assign an agent to each task. Returns `(assigned, unassigned)`;
    /// a task is unassigned when it got no pairing or an unknown agent.
    pub async fn select_agents(
        &self,
        user_query: &str,
        tasks: Vec<Task>,
        agents: &[Arc<Agent>],
    ) -> Result<(Vec<Task>, Vec<Task>)> {
        info!("Selecting agents for {} tasks", tasks.len());

        let selection: RouterSelection = self
            .client
            .call(
                user_query,
                &build_router_prompt(),
                &router_kwargs(agents, &tasks),
            )
            .await?;

        info!(
            "Router returned {} pairings (confidence: {:?})",
            selection.selected_agents.len(),
            selection.confidence
        );

        let mut assigned = Vec::new();
        let mut unassigned = Vec::new();

        for mut task in tasks {
            let pairing = selection
                .selected_agents
                .iter()
                .find(|pair| pair.task_id == task.identifier);

            match pairing {
                Some(pair) if agents.iter().any(|a| a.name == pair.agent_name) => {
                    info!(
                        "Assigned task '{}' to agent '{}'",
                        task.identifier, pair.agent_name
                    );
                    task.agent = Some(pair.agent_name.clone());
                    assigned.push(task);
                }
                Some(pair) => {
                    warn!(
                        "Could not find matching agent '{}' for task '{}'",
                        pair.agent_name, task.identifier
                    );
                    unassigned.push(task);
                }
                None => {
                    warn!("No pairing returned for task '{}'", task.identifier);
                    unassigned.push(task);
                }
            }
        }

        info!(
            "Assignment complete: {} tasks assigned, {} tasks unassigned",
            assigned.len(),
            unassigned.len()
        );
        Ok((assigned, unassigned))
    }
}
