//! Error types for Overseer

use thiserror::Error;

/// Result type alias using Overseer's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Overseer
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required environment variable is missing at agent construction
    #[error("Environment variable {0} is required")]
    MissingEnvironment(String),

    /// Model output did not conform to the declared schema after all retries
    #[error("LLM response did not match schema '{expected}': {message}")]
    LlmResponse {
        message: String,
        /// Raw model text, truncated to 500 characters
        raw: String,
        /// Name of the expected output schema
        expected: String,
    },

    /// All retry attempts were exhausted on a transport or model failure
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// An operation exceeded its time budget
    #[error("Operation '{operation}' timed out after {budget_secs}s")]
    Timeout { operation: String, budget_secs: u64 },

    /// A tool invocation raised; fed back to the model, never surfaced
    /// from the tool-call loop itself
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// One or more tasks failed during DAG execution
    #[error("Some tasks failed during execution: {}", failed.len())]
    TasksFailed { failed: Vec<(String, String)> },

    /// Duplicate task identifier on insert
    #[error("Duplicate task ID: {0}")]
    DuplicateTask(String),

    /// Task lookup miss
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A declared dependency refers to no known task
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// A dependency of an executing task is absent from the store
    #[error("Dependency task {0} not found")]
    DependencyNotFound(String),

    /// A dependency has not finished yet
    #[error("Dependency task {0} not yet complete")]
    DependencyIncomplete(String),

    /// A dependency finished with an error
    #[error("Dependency task {id} failed with error: {error}")]
    DependencyFailed { id: String, error: String },

    /// The task graph contains a cycle
    #[error("Circular dependency detected involving tasks: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// Acquire exceeded the pool timeout
    #[error("Connection pool exhausted: timeout after {timeout_secs}s")]
    PoolExhausted { timeout_secs: u64 },

    /// Semantic memory store/search failure; logged, never surfaced
    #[error("Memory error: {0}")]
    Memory(String),

    /// Delegation pipeline node failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Child process management error
    #[error("Process error: {0}")]
    Process(String),

    /// LLM provider / MCP server error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Prompt template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Check if error is retryable inside the LLM loop
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Provider(_) | Error::Timeout { .. } | Error::LlmResponse { .. }
        )
    }

    /// Build an [`Error::LlmResponse`], truncating the raw model text to 500
    /// characters for logging.
    pub fn llm_response(
        message: impl Into<String>,
        raw: &str,
        expected: impl Into<String>,
    ) -> Self {
        let truncated: String = raw.chars().take(500).collect();
        Error::LlmResponse {
            message: message.into(),
            raw: truncated,
            expected: expected.into(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<handlebars::RenderError> for Error {
    fn from(err: handlebars::RenderError) -> Self {
        Error::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for Error {
    fn from(err: handlebars::TemplateError) -> Self {
        Error::Template(err.to_string())
    }
}
