//! Report generation over completed tasks
//!
//! Combines a structured execution summary with an LLM-generated detailed
//! analysis connecting the task outcomes back to the original query.

use std::sync::Arc;

use tracing::warn;

use crate::agent::AgentResponse;
use crate::error::Result;
use crate::llm::{LlmClient, PromptKwargs};
use crate::prompts::build_analyst_prompt;
use crate::tasks::Task;

/// Synthesizes the final report for a delegation run
pub struct ReportGenerator {
    client: Arc<LlmClient>,
}

impl ReportGenerator {
    pub fn new(client: Arc<LlmClient>) -> Self {
        ReportGenerator { client }
    }

    /// Generate the full report: execution summary plus detailed analysis.
    /// Falls back to the summary alone if the analysis call fails.
    pub async fn generate_report(&self, tasks: &[Task], user_query: &str) -> Result<String> {
        let summary = execution_summary(tasks).join("\n");

        let analysis_query = format!(
            "Analyze the following task execution results in the context of the \
             original user request.\n\nOriginal User Query:\n\"{}\"\n\nTask Results:\n{}\n\
             \nPlease provide a detailed analysis focusing on:\
             \n1. How well the tasks fulfilled the user's original request\
             \n2. How tasks worked together and dependencies were handled\
             \n3. Key findings or results from each task\
             \n4. Overall success of the workflow\
             \n5. Whether the results fully address the user's needs\
             \n\nProvide your analysis in a clear, structured format that connects \
             the results back to the original query.",
            user_query,
            format_task_info(tasks)
        );

        let analysis: AgentResponse = match self
            .client
            .call(&analysis_query, &build_analyst_prompt(), &PromptKwargs::new())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Detailed analysis call failed, reporting summary only: {}", e);
                return Ok(summary);
            }
        };

        Ok(format!(
            "{}\n\n=== Detailed Analysis ===\n\n{}",
            summary, analysis.response
        ))
    }
}

/// High-level execution statistics and per-task results
fn execution_summary(tasks: &[Task]) -> Vec<String> {
    let completed: Vec<&Task> = tasks.iter().filter(|t| t.done && t.error.is_none()).collect();
    let failed: Vec<&Task> = tasks.iter().filter(|t| t.error.is_some()).collect();

    let mut summary = vec![
        "=== Execution Summary ===\n".to_string(),
        format!("Total Tasks: {}\n", tasks.len()),
        format!("Completed: {}\n", completed.len()),
        format!("Failed: {}\n", failed.len()),
        "\nTask Results:\n".to_string(),
    ];

    for task in &completed {
        summary.push(format!("\n[{}] {}", task.identifier, task.description));
        if let Some(ref agent) = task.agent {
            summary.push(format!("Agent: {}", agent));
        }
        if !task.dependencies.is_empty() {
            summary.push(format!("Dependencies: {}", task.dependencies.join(", ")));
        }
        summary.push("Result:\n".to_string());
        summary.push(
            task.result
                .as_ref()
                .map(|r| r.response.clone())
                .unwrap_or_default(),
        );
        summary.push("---".to_string());
    }

    for task in &failed {
        let error = task.error.as_deref().unwrap_or("unknown error");
        let first_line = error.lines().next().unwrap_or(error);
        summary.push(format!(
            "\n[{}] {} FAILED: {}",
            task.identifier, task.description, first_line
        ));
    }

    summary
}

/// Structured task listing fed to the analyst prompt
fn format_task_info(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(|task| {
            format!(
                "Task {}:\nDescription: {}\nAgent: {}\nDependencies: {}\nResult: {}\n",
                task.identifier,
                task.description,
                task.agent.as_deref().unwrap_or("unassigned"),
                if task.dependencies.is_empty() {
                    "None".to_string()
                } else {
                    task.dependencies.join(", ")
                },
                task.result
                    .as_ref()
                    .map(|r| r.response.clone())
                    .or_else(|| task.error.clone())
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
