//! Delegation pipeline state

use crate::tasks::Task;

/// Value object threaded through the pipeline's state graph
#[derive(Debug, Default, Clone)]
pub struct DelegateState {
    /// The original user query that initiated the workflow
    pub user_query: String,
    /// Tasks to execute (stubs after generation, bound after assignment)
    pub tasks: Vec<Task>,
    /// Completed tasks with their execution results
    pub results: Vec<Task>,
    /// The final compiled report
    pub report: String,
    /// Direct answer for trivial queries that produced no tasks
    pub direct_response: Option<String>,
    /// Pipeline failure note, set when a node raised
    pub error: Option<String>,
}

impl DelegateState {
    pub fn new(user_query: impl Into<String>) -> Self {
        DelegateState {
            user_query: user_query.into(),
            ..Default::default()
        }
    }

    /// Clear tasks and results after an unrecoverable node failure
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.results.clear();
    }

    /// Markdown breakdown of the task plan and per-task results
    pub fn task_report(&self) -> String {
        let mut markdown = String::from("# Task Execution Plan\n\n");
        for (i, task) in self.tasks.iter().enumerate() {
            markdown.push_str(&format!("## Task {}: {}\n\n", i + 1, task.description));
            markdown.push_str(&format!("- **ID**: `{}`\n", task.identifier));
            markdown.push_str(&format!("- **Priority**: {}\n", task.priority));
            if task.dependencies.is_empty() {
                markdown.push_str("- **Dependencies**: None\n");
            } else {
                let deps: Vec<String> = task
                    .dependencies
                    .iter()
                    .map(|dep| format!("`{}`", dep))
                    .collect();
                markdown.push_str(&format!("- **Dependencies**: {}\n", deps.join(", ")));
            }
            markdown.push_str("\n### Operations:\n\n");
            for (j, operation) in task.operations.iter().enumerate() {
                markdown.push_str(&format!("{}. {}\n", j + 1, operation));
            }
            markdown.push('\n');
            if let Some(ref result) = task.result {
                markdown.push_str("### Result\n\n");
                markdown.push_str(&result.response);
                markdown.push('\n');
            }
        }
        markdown
    }
}
