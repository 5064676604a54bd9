//! Tasks: the unit of work flowing through the delegation pipeline
//!
//! A task carries an ordered list of operations for one agent, dependency
//! edges onto other tasks, and its execution state. The [`TaskManager`]
//! holds a run's tasks, derives layered execution plans, and executes them
//! with bounded concurrency.

mod manager;

pub use manager::{TaskManager, TaskManagerStats};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::AgentResponse;
use crate::error::{Error, Result};

/// A unit of work to be executed by an agent
///
/// Execution state (`result`, `error`, `done`) and the bound agent are
/// runtime-only and excluded from the schema the model fills in.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Unique 16-character hex identifier, auto-generated if absent
    #[serde(default = "generate_identifier")]
    pub identifier: String,

    /// Human-readable description of what the task accomplishes
    #[serde(default)]
    pub description: String,

    /// Operations the agent performs in sequence
    #[serde(default)]
    pub operations: Vec<String>,

    /// Identifiers of tasks that must complete successfully first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Higher values are dispatched first within a layer
    #[serde(default)]
    pub priority: i32,

    /// Name of the agent bound during assignment
    #[serde(skip)]
    pub agent: Option<String>,

    /// Structured output, populated on success
    #[serde(skip)]
    pub result: Option<AgentResponse>,

    /// Error message, populated iff execution failed
    #[serde(skip)]
    pub error: Option<String>,

    /// True once execution produced either a result or an error
    #[serde(skip)]
    pub done: bool,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            identifier: generate_identifier(),
            description: String::new(),
            operations: Vec::new(),
            dependencies: Vec::new(),
            priority: 0,
            agent: None,
            result: None,
            error: None,
            done: false,
        }
    }
}

/// Random 16-character hex identifier
fn generate_identifier() -> String {
    format!("{:016x}", rand::random::<u64>())
}

impl Task {
    /// Create a task with the given identifier
    pub fn new(identifier: impl Into<String>) -> Self {
        Task {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_operations(mut self, operations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.operations = operations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies(
        mut self,
        dependencies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Validate construction invariants; a non-empty description must be at
    /// least 3 characters.
    pub fn validate(&self) -> Result<()> {
        if !self.description.is_empty() && self.description.len() < 3 {
            return Err(Error::InvalidInput(format!(
                "Task description must be at least 3 characters, got '{}'",
                self.description
            )));
        }
        Ok(())
    }

    /// Clear execution state so the task can run again
    pub fn reset(&mut self) {
        self.result = None;
        self.error = None;
        self.done = false;
    }
}
