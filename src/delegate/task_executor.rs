//! DAG task execution
//!
//! Enqueues assigned tasks into a task manager, derives execution layers,
//! and runs each task through the agent executor with a per-task timeout.
//! The per-task prompt carries the original query, the operation sequence,
//! and the results of completed dependencies.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::executor::AgentExecutor;
use crate::agent::{AgentRegistry, AgentResponse};
use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::llm::PromptKwargs;
use crate::tasks::{Task, TaskManager};

/// Executes a list of assigned tasks with dependency management
pub struct TaskExecutor {
    executor: Arc<AgentExecutor>,
    registry: Arc<AgentRegistry>,
    config: TaskConfig,
}

impl TaskExecutor {
    pub fn new(
        executor: Arc<AgentExecutor>,
        registry: Arc<AgentRegistry>,
        config: TaskConfig,
    ) -> Self {
        TaskExecutor {
            executor,
            registry,
            config,
        }
    }

    /// Execute the tasks, respecting dependencies and the layer concurrency
    /// limit. Returns every task, each done with either a result or an
    /// error; individual failures do not abort the run.
    pub async fn execute_tasks(&self, tasks: Vec<Task>, user_query: &str) -> Result<Vec<Task>> {
        let manager = Arc::new(TaskManager::with_limits(
            self.config.max_completed_tasks,
            self.config.result_size_limit,
        ));

        for task in tasks {
            info!(
                "Added task '{}': {} with {} operations",
                task.identifier,
                task.description,
                task.operations.len()
            );
            manager.add_task(task)?;
        }

        let stats = manager.stats();
        info!(
            "Task stats before execution: total={}, pending={}, memory_mb={:.2}",
            stats.total_tasks,
            stats.pending_tasks,
            stats.memory_mb()
        );

        let handler_manager = manager.clone();
        let user_query = user_query.to_string();
        let handler = move |task: Task, deps: HashMap<String, AgentResponse>| {
            let manager = handler_manager.clone();
            let executor = self.executor.clone();
            let registry = self.registry.clone();
            let user_query = user_query.clone();
            let timeout = self.config.task_timeout;
            async move {
                let agent_name = task.agent.clone().ok_or_else(|| {
                    Error::Execution(format!("No agent assigned to task: {}", task.identifier))
                })?;
                let agent = registry.get(&agent_name).ok_or_else(|| {
                    Error::Execution(format!(
                        "Unknown agent '{}' for task {}",
                        agent_name, task.identifier
                    ))
                })?;

                info!(
                    "Executing task '{}' with agent '{}' ({} operations, {} dependencies)",
                    task.identifier,
                    agent_name,
                    task.operations.len(),
                    deps.len()
                );

                let operations_query = build_operations_query(&manager, &task, &user_query, &deps);
                let full_query = format!(
                    "{}\n\nAlways return your response in markdown format.",
                    operations_query
                );

                match tokio::time::timeout(
                    timeout,
                    executor.execute(full_query, agent, PromptKwargs::new(), true),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        operation: format!("task_{}", task.identifier),
                        budget_secs: timeout.as_secs(),
                    }),
                }
            }
        };

        info!("Starting task execution");
        manager.execute_all(handler, self.config.concurrency).await?;
        info!("Task execution completed");

        let stats = manager.stats();
        info!(
            "Task stats after execution: total={}, completed={}, failed={}, memory_mb={:.2}",
            stats.total_tasks,
            stats.completed_tasks,
            stats.failed_tasks,
            stats.memory_mb()
        );

        let tasks = manager.tasks();
        let failed = tasks.iter().filter(|t| t.error.is_some()).count();
        if failed > 0 {
            warn!("{} of {} tasks failed during execution", failed, tasks.len());
        }
        Ok(tasks)
    }

    /// Turn per-task failures into a [`Error::TasksFailed`] for callers that
    /// need an all-or-nothing outcome.
    pub fn ensure_all_succeeded(tasks: &[Task]) -> Result<()> {
        let failed: Vec<(String, String)> = tasks
            .iter()
            .filter_map(|task| {
                task.error
                    .as_ref()
                    .map(|error| (task.identifier.clone(), error.clone()))
            })
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::TasksFailed { failed })
        }
    }
}

/// Assemble the per-task prompt for the assigned agent
fn build_operations_query(
    manager: &TaskManager,
    task: &Task,
    user_query: &str,
    dependency_results: &HashMap<String, AgentResponse>,
) -> String {
    let operations_list: Vec<String> = task
        .operations
        .iter()
        .enumerate()
        .map(|(i, op)| format!("{}. {}", i + 1, op))
        .collect();

    let mut parts = vec![
        format!("Original Query: {}\n", user_query),
        format!("Task Description: {}\n", task.description),
        format!(
            "\nOperations to perform in sequence:\n{}\n",
            operations_list.join("\n")
        ),
    ];

    if !dependency_results.is_empty() {
        let mut dep_ids: Vec<&String> = dependency_results.keys().collect();
        dep_ids.sort();

        let mut sections = Vec::new();
        for dep_id in dep_ids {
            // Skip dependencies evicted from the store
            let Ok(dep_task) = manager.get_task(dep_id) else {
                continue;
            };
            let result = &dependency_results[dep_id];
            sections.push(format!(
                "Dependency Task '{}':\n- Description: {}\n- Result:\n{}\n",
                dep_id, dep_task.description, result.response
            ));
        }
        if !sections.is_empty() {
            parts.push(format!("\nDependency Results:\n{}", sections.join("\n")));
        }
    }

    parts.push(
        "\nInstructions:\
         \n1. Execute each operation in the specified sequence\
         \n2. Use appropriate tools for each operation\
         \n3. Provide results after each operation\
         \n4. Handle any errors that occur during execution\
         \n5. Return a combined summary of all operations\
         \n6. IMPORTANT: Avoid making duplicate or redundant tool calls\
         \n7. If you need data from a previous operation, use the data already obtained\
         \n8. Consolidate operations to minimize the number of tool calls"
            .to_string(),
    );

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::LlmConfig;
    use crate::llm::{LlmClient, ModelProvider};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingProvider {
        queries: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ModelProvider for RecordingProvider {
        async fn generate(&self, _system_prompt: &str, user_query: &str) -> Result<String> {
            self.queries.lock().unwrap().push(user_query.to_string());
            if let Some(ref marker) = self.fail_on {
                if user_query.contains(marker.as_str()) {
                    return Err(Error::Provider("agent exploded".into()));
                }
            }
            Ok(r#"{"response": "Task result"}"#.to_string())
        }
        fn model(&self) -> &str {
            "recording"
        }
    }

    fn setup(fail_on: Option<&str>) -> (Arc<RecordingProvider>, TaskExecutor) {
        let provider = Arc::new(RecordingProvider {
            queries: Mutex::new(Vec::new()),
            fail_on: fail_on.map(String::from),
        });
        let client = Arc::new(LlmClient::new(
            provider.clone(),
            LlmConfig {
                max_retries: 2,
                backoff_base: std::time::Duration::from_millis(1),
                ..Default::default()
            },
        ));
        let mut registry = AgentRegistry::new();
        registry.register(Agent::builder("worker").description("Does work").build().unwrap());

        let executor = TaskExecutor::new(
            Arc::new(AgentExecutor::new(client, None)),
            Arc::new(registry),
            TaskConfig::default(),
        );
        (provider, executor)
    }

    fn assigned_task(id: &str, deps: &[&str]) -> Task {
        Task::new(id)
            .with_description(format!("Task {id}"))
            .with_operations(["op one", "op two"])
            .with_dependencies(deps.iter().copied())
            .with_agent("worker")
    }

    #[tokio::test]
    async fn test_execute_tasks_success() {
        let (provider, executor) = setup(None);
        let tasks = vec![
            assigned_task("t1", &[]),
            assigned_task("t2", &["t1"]),
        ];

        let executed = executor.execute_tasks(tasks, "Test query").await.unwrap();
        assert_eq!(executed.len(), 2);
        for task in &executed {
            assert!(task.done);
            assert!(task.error.is_none());
            assert_eq!(task.result.as_ref().unwrap().response, "Task result");
        }
        TaskExecutor::ensure_all_succeeded(&executed).unwrap();

        // The dependent task's prompt carried the dependency result
        let queries = provider.queries.lock().unwrap();
        assert!(queries[0].contains("Original Query: Test query"));
        assert!(queries[0].contains("Task Description: Task t1"));
        assert!(queries[0].contains("Operations to perform in sequence:"));
        assert!(queries[0].contains("1. op one"));
        assert!(queries[0].contains("Instructions:"));
        assert!(queries[0].ends_with("Always return your response in markdown format."));
        assert!(queries[1].contains("Dependency Results:"));
        assert!(queries[1].contains("Dependency Task 't1':"));
        assert!(queries[1].contains("Task result"));
    }

    #[tokio::test]
    async fn test_unassigned_task_fails_without_aborting_run() {
        let (_, executor) = setup(None);
        let mut unassigned = assigned_task("t1", &[]);
        unassigned.agent = None;

        let executed = executor
            .execute_tasks(vec![unassigned, assigned_task("t2", &[])], "query")
            .await
            .unwrap();

        let t1 = executed.iter().find(|t| t.identifier == "t1").unwrap();
        assert!(t1.done);
        assert!(t1.error.as_ref().unwrap().contains("No agent assigned to task: t1"));

        let t2 = executed.iter().find(|t| t.identifier == "t2").unwrap();
        assert!(t2.error.is_none());

        let err = TaskExecutor::ensure_all_succeeded(&executed).unwrap_err();
        match err {
            Error::TasksFailed { failed } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, "t1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_propagates_to_dependents() {
        let (_, executor) = setup(Some("Task t1"));
        let executed = executor
            .execute_tasks(
                vec![assigned_task("t1", &[]), assigned_task("t2", &["t1"])],
                "query",
            )
            .await
            .unwrap();

        let t1 = executed.iter().find(|t| t.identifier == "t1").unwrap();
        assert!(t1.error.is_some());

        let t2 = executed.iter().find(|t| t.identifier == "t2").unwrap();
        assert!(t2
            .error
            .as_ref()
            .unwrap()
            .contains("Dependency task t1 failed with error"));
    }
}
