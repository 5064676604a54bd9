//! Prompt templates for the delegation pipeline and their response models
//!
//! The manager prompt turns a user query into a task plan; the router
//! prompt pairs tasks with agents; the analyst prompt synthesizes the final
//! report. Each template declares its structured output model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{Agent, Diagnostics};
use crate::llm::{PromptKwargs, PromptTemplate};
use crate::tasks::Task;

/// Manager prompt: decompose a user query into grouped tasks
const MANAGER_PROMPT: &str = "\
You will analyze user queries and break them down into tasks.

Only treat a query as trivial if it can be answered with a simple factual
response that requires NO actions, operations, or system changes. You MUST
create tasks for any query that requires file operations, code changes,
system operations, multiple steps, use of any tools or external resources,
or any action that changes system state.

Task organization rules:
1. Group operations by agent capability: combine operations one agent can
   perform, operations on the same resources, and related operations.
2. Each task is handled by ONE agent; a task may include multiple operations
   that the agent performs in sequence.
3. Declare dependencies between tasks by task identifier, and set a higher
   priority (integer) for tasks that should be dispatched first.

Do not assign agents; agent assignment is handled by the system. Just list
the operations each task needs.

Your response must either:
- answer a trivial query directly in the `response` field with an empty
  `tasks` list, or
- return logically grouped tasks with clear operation sequences,
  dependencies where needed, and priorities.

{{memory_context}}

These are the agents available and their capabilities:
{{#each agents}}
- Name: {{this.name}}
  Description: {{this.description}}
  Supports Multiple Operations: {{#if this.supports_multiple_operations}}Yes{{else}}No{{/if}}
{{/each}}";

/// Router prompt: pair each task with the most appropriate agent
const ROUTER_PROMPT: &str = "\
You are a router for a set of agents. You are given a set of agents and a
set of tasks. Select the most appropriate agent for each task.

Available Agents:
{{#each agents}}
- Name: {{this.name}}
  Description: {{this.description}}
{{/each}}

Available Tasks:
{{#each tasks}}
- ID: {{this.id}}
  Description: {{this.description}}
{{/each}}

Return `selected_agents` as a list of {agent_name, task_id} pairings (one
agent per task, one task per pairing; empty if nothing matches) and
`confidence` as a float in [0, 1] reflecting how well the pairings fit, or
null if no agent was selected.";

/// Analyst prompt used for the detailed report section
const ANALYST_PROMPT: &str = "\
You are an expert at analyzing task execution results. Understand the
user's original intent, analyze how well the executed tasks fulfilled it,
evaluate the completeness and quality of the results, and suggest any
potential improvements or additional steps if needed. Then give a concise
summary of the report.";

/// A single-agent selection prompt for one-shot queries
const SELECTOR_PROMPT: &str = "\
You are a router for a set of agents. Given the user query, select the one
agent best suited to handle it and return its name in `selected_agent`
(null if none fits).

Available Agents:
{{#each agents}}
- Name: {{this.name}}
  Description: {{this.description}}
{{/each}}";

/// Plan produced by the manager prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ManagerPlan {
    /// Direct answer for trivial queries; otherwise a short rationale
    #[serde(default)]
    pub response: String,
    /// Tasks to execute; empty for trivial queries
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

/// One agent/task pairing from the router
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentTaskPairing {
    /// Name of the selected agent
    pub agent_name: String,
    /// Identifier of the task assigned to that agent
    pub task_id: String,
}

/// Routing result: pairings plus a confidence score
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RouterSelection {
    #[serde(default)]
    pub selected_agents: Vec<AgentTaskPairing>,
    /// Confidence in [0, 1]; null when nothing was selected
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

/// Single-agent selection result
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SingleSelection {
    #[serde(default)]
    pub selected_agent: Option<String>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

pub fn build_manager_prompt() -> PromptTemplate {
    PromptTemplate::new(MANAGER_PROMPT)
}

pub fn build_router_prompt() -> PromptTemplate {
    PromptTemplate::new(ROUTER_PROMPT)
}

pub fn build_analyst_prompt() -> PromptTemplate {
    PromptTemplate::new(ANALYST_PROMPT)
}

pub fn build_selector_prompt() -> PromptTemplate {
    PromptTemplate::new(SELECTOR_PROMPT)
}

/// Kwargs for the manager prompt: agent capability listing
pub fn manager_kwargs(agents: &[std::sync::Arc<Agent>]) -> PromptKwargs {
    let listed: Vec<Value> = agents
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name,
                "description": agent.description,
                "supports_multiple_operations": agent.supports_multiple_operations,
            })
        })
        .collect();

    let mut kwargs = PromptKwargs::new();
    kwargs.insert("agents".into(), Value::Array(listed));
    kwargs
}

/// Kwargs for the router prompt: full agent descriptions plus task stubs
pub fn router_kwargs(agents: &[std::sync::Arc<Agent>], tasks: &[Task]) -> PromptKwargs {
    let listed_agents: Vec<Value> = agents
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name,
                "description": agent.full_description(),
            })
        })
        .collect();
    let listed_tasks: Vec<Value> = tasks
        .iter()
        .map(|task| {
            json!({
                "id": task.identifier,
                "description": task.description,
            })
        })
        .collect();

    let mut kwargs = PromptKwargs::new();
    kwargs.insert("agents".into(), Value::Array(listed_agents));
    kwargs.insert("tasks".into(), Value::Array(listed_tasks));
    kwargs
}

/// Kwargs for the single-agent selector prompt
pub fn selector_kwargs(agents: &[std::sync::Arc<Agent>]) -> PromptKwargs {
    let listed: Vec<Value> = agents
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name,
                "description": agent.description,
            })
        })
        .collect();

    let mut kwargs = PromptKwargs::new();
    kwargs.insert("agents".into(), Value::Array(listed));
    kwargs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn agents() -> Vec<Arc<Agent>> {
        vec![
            Arc::new(Agent::builder("files").description("File operations").build().unwrap()),
            Arc::new(
                Agent::builder("search")
                    .description("Web search")
                    .supports_multiple_operations(false)
                    .build()
                    .unwrap(),
            ),
        ]
    }

    #[test]
    fn test_manager_prompt_lists_agents() {
        let mut kwargs = manager_kwargs(&agents());
        kwargs.insert("memory_context".into(), json!(""));

        let rendered = build_manager_prompt().render(&kwargs).unwrap();
        assert!(rendered.contains("Name: files"));
        assert!(rendered.contains("Description: File operations"));
        assert!(rendered.contains("Supports Multiple Operations: Yes"));
        assert!(rendered.contains("Supports Multiple Operations: No"));
    }

    #[test]
    fn test_router_prompt_lists_tasks_and_agents() {
        let tasks = vec![
            Task::new("task1").with_description("List files"),
            Task::new("task2").with_description("Search docs"),
        ];
        let mut kwargs = router_kwargs(&agents(), &tasks);
        kwargs.insert("memory_context".into(), json!(""));

        let rendered = build_router_prompt().render(&kwargs).unwrap();
        assert!(rendered.contains("ID: task1"));
        assert!(rendered.contains("Description: Search docs"));
        assert!(rendered.contains("Name: search"));
    }

    #[test]
    fn test_manager_plan_decodes_tasks() {
        let plan: ManagerPlan = serde_json::from_value(json!({
            "response": "",
            "tasks": [
                {"identifier": "t1", "description": "Collect data", "operations": ["fetch"]},
                {"identifier": "t2", "description": "Summarize", "dependencies": ["t1"]}
            ]
        }))
        .unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].dependencies, vec!["t1"]);
    }

    #[test]
    fn test_router_selection_decodes_pairs() {
        let selection: RouterSelection = serde_json::from_value(json!({
            "selected_agents": [
                {"agent_name": "files", "task_id": "t1"}
            ],
            "confidence": 0.8
        }))
        .unwrap();
        assert_eq!(selection.selected_agents.len(), 1);
        assert_eq!(selection.selected_agents[0].agent_name, "files");
        assert_eq!(selection.confidence, Some(0.8));
    }
}
