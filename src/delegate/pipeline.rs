//! The delegation pipeline state machine
//!
//! generate_tasks -> (tasks non-empty?) -> assign_agents -> execute_tasks
//! -> handle_results -> end, with the empty-plan edge jumping straight to
//! handle_results. A node failure resets the state and terminates at
//! handle_results with an error report.

use std::sync::Arc;

use tracing::{info, warn};

use super::executor::AgentExecutor;
use super::report::ReportGenerator;
use super::selector::AgentSelector;
use super::state::DelegateState;
use super::task_executor::TaskExecutor;
use crate::agent::AgentRegistry;
use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::graph::StateGraph;
use crate::llm::LlmClient;
use crate::memory::SemanticMemory;
use crate::prompts::{build_manager_prompt, manager_kwargs, ManagerPlan};

/// Orchestrates task generation, assignment, execution, and reporting
pub struct DelegatePipeline {
    client: Arc<LlmClient>,
    registry: Arc<AgentRegistry>,
    selector: AgentSelector,
    task_executor: TaskExecutor,
    report_generator: ReportGenerator,
}

impl DelegatePipeline {
    pub fn new(
        client: Arc<LlmClient>,
        registry: Arc<AgentRegistry>,
        memory: Option<Arc<SemanticMemory>>,
        task_config: TaskConfig,
    ) -> Arc<Self> {
        let agent_executor = Arc::new(AgentExecutor::new(client.clone(), memory));
        Arc::new(DelegatePipeline {
            selector: AgentSelector::new(client.clone()),
            task_executor: TaskExecutor::new(agent_executor, registry.clone(), task_config),
            report_generator: ReportGenerator::new(client.clone()),
            client,
            registry,
        })
    }

    /// Run the pipeline for a user query, always producing a final state
    /// with a report.
    pub async fn run(self: &Arc<Self>, user_query: &str) -> Result<DelegateState> {
        let graph = self.build_graph();
        let state = DelegateState::new(user_query);

        match graph.run(state).await {
            Ok(final_state) => Ok(final_state),
            Err(e) => {
                warn!("Pipeline node failed, emitting error report: {}", e);
                let mut state = DelegateState::new(user_query);
                state.reset();
                state.error = Some(e.to_string());
                self.handle_results(state).await
            }
        }
    }

    fn build_graph(self: &Arc<Self>) -> StateGraph<DelegateState> {
        let mut graph = StateGraph::new();

        let pipeline = self.clone();
        graph.add_node("generate_tasks", move |state| {
            let pipeline = pipeline.clone();
            async move { pipeline.generate_tasks(state).await }
        });

        let pipeline = self.clone();
        graph.add_node("assign_agents", move |state| {
            let pipeline = pipeline.clone();
            async move { pipeline.assign_agents(state).await }
        });

        let pipeline = self.clone();
        graph.add_node("execute_tasks", move |state| {
            let pipeline = pipeline.clone();
            async move { pipeline.execute_tasks(state).await }
        });

        let pipeline = self.clone();
        graph.add_node("handle_results", move |state| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle_results(state).await }
        });

        graph.set_entrypoint("generate_tasks");
        graph.set_exit("end");
        graph.add_conditional_edge("generate_tasks", "assign_agents", |s: &DelegateState| {
            !s.tasks.is_empty()
        });
        graph.add_edge("generate_tasks", "handle_results");
        graph.add_edge("assign_agents", "execute_tasks");
        graph.add_edge("execute_tasks", "handle_results");
        graph.add_edge("handle_results", "end");

        graph
    }

    /// Ask the manager prompt for a task plan; trivial queries come back
    /// with a direct response and no tasks.
    async fn generate_tasks(&self, mut state: DelegateState) -> Result<DelegateState> {
        info!("Processing user query: {}", state.user_query);

        let agents = self.registry.all();
        if agents.is_empty() {
            return Err(Error::Execution("No agents registered".to_string()));
        }

        let plan: ManagerPlan = self
            .client
            .call(
                &state.user_query,
                &build_manager_prompt(),
                &manager_kwargs(&agents),
            )
            .await
            .map_err(|e| Error::Execution(format!("Failed to generate tasks: {}", e)))?;

        for task in &plan.tasks {
            task.validate()
                .map_err(|e| Error::Execution(format!("Invalid generated task: {}", e)))?;
        }

        if plan.tasks.is_empty() {
            info!("No tasks generated, using direct response");
        } else {
            info!("Generated {} tasks", plan.tasks.len());
        }
        state.tasks = plan.tasks;
        state.direct_response = Some(plan.response);
        Ok(state)
    }

    /// Bind an agent to every task; any unassigned task fails the node
    async fn assign_agents(&self, mut state: DelegateState) -> Result<DelegateState> {
        let agents = self.registry.all();
        let (assigned, unassigned) = self
            .selector
            .select_agents(&state.user_query, std::mem::take(&mut state.tasks), &agents)
            .await?;

        if assigned.is_empty() && unassigned.is_empty() {
            return Err(Error::Execution(
                "No tasks were assigned to agents".to_string(),
            ));
        }
        if !unassigned.is_empty() {
            let descriptions: Vec<&str> =
                unassigned.iter().map(|t| t.description.as_str()).collect();
            return Err(Error::Execution(format!(
                "Could not assign agents to tasks: {}",
                descriptions.join(", ")
            )));
        }

        state.tasks = assigned;
        Ok(state)
    }

    /// Run the DAG; per-task failures stay in the task list and are
    /// reported, not raised.
    async fn execute_tasks(&self, mut state: DelegateState) -> Result<DelegateState> {
        info!("Executing {} tasks", state.tasks.len());
        let executed = self
            .task_executor
            .execute_tasks(std::mem::take(&mut state.tasks), &state.user_query)
            .await?;
        state.tasks = executed;
        Ok(state)
    }

    /// Compile the final report
    async fn handle_results(&self, mut state: DelegateState) -> Result<DelegateState> {
        if let Some(ref error) = state.error {
            state.report = format!("Delegation failed: {}", error);
            return Ok(state);
        }

        if state.tasks.is_empty() {
            info!("No tasks were executed, reporting direct response");
            state.results = Vec::new();
            state.report = state
                .direct_response
                .clone()
                .filter(|response| !response.is_empty())
                .unwrap_or_else(|| "No tasks were generated for this query.".to_string());
            return Ok(state);
        }

        state.results = state.tasks.clone();
        state.report = self
            .report_generator
            .generate_report(&state.tasks, &state.user_query)
            .await?;
        Ok(state)
    }
}
