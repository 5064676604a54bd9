//! Configuration for the orchestration runtime
//!
//! Layered loading: serde defaults, then an optional `overseer.toml` file,
//! then `OVERSEER__*` environment overrides. Model credentials are read from
//! the environment at LLM-client construction, not stored here.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    pub llm: LlmConfig,
    pub tasks: TaskConfig,
    pub pool: PoolConfig,
    pub memory: MemoryConfig,
    pub process: ProcessConfig,
    pub mcp: McpConfig,
    pub storage: StorageConfig,
}

/// LLM client configuration: loop bounds, backoff, caching, timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier sent to the provider
    pub model: String,
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub base_url: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Request a JSON object response from the provider
    pub json_output: bool,
    /// Maximum generate/act iterations per call
    pub max_retries: u32,
    /// Maximum tool calls executed concurrently within one iteration
    pub max_parallel_tools: usize,
    /// Maximum accumulated tool-result records retained across iterations
    pub max_accumulated_results: usize,
    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Ceiling for exponential backoff
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Response cache time-to-live
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Response cache capacity (entries)
    pub cache_capacity: u64,
    /// Per-call budget for a single structured call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            temperature: 0.0,
            json_output: true,
            max_retries: 25,
            max_parallel_tools: 5,
            max_accumulated_results: 50,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Task manager and executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Completed tasks retained before the oldest is evicted
    pub max_completed_tasks: usize,
    /// Aggregate byte budget for retained task results
    pub result_size_limit: usize,
    /// Tasks executed concurrently within one DAG layer
    pub concurrency: usize,
    /// Budget for a single task execution (long tool chains)
    #[serde(with = "humantime_serde")]
    pub task_timeout: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            max_completed_tasks: 1000,
            result_size_limit: 50 * 1024 * 1024,
            concurrency: 4,
            task_timeout: Duration::from_secs(2048),
        }
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrently existing connections
    pub pool_size: usize,
    /// Idle connections older than this are closed on next acquire
    #[serde(with = "humantime_serde")]
    pub max_idle_time: Duration,
    /// Maximum wait on acquire
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            pool_size: 5,
            max_idle_time: Duration::from_secs(300),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Semantic memory integration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Whether memory retrieval/storage is active
    pub enabled: bool,
    /// Memory space identifier
    pub user_id: String,
    /// Maximum entries retrieved per query
    pub search_limit: usize,
    /// Minimum similarity for retrieved entries
    pub similarity_threshold: f32,
    /// Base URL of the external vector store, if any
    pub store_url: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            enabled: true,
            user_id: "overseer".to_string(),
            search_limit: 5,
            similarity_threshold: 0.5,
            store_url: None,
        }
    }
}

/// Process supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Ring-buffer capacity per output stream
    pub max_buffer_lines: usize,
    /// Graceful-termination budget before force kill
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            max_buffer_lines: 1000,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// MCP server discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Path to the server registry file
    pub config_path: String,
    /// Budget for server initialization
    #[serde(with = "humantime_serde")]
    pub init_timeout: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        McpConfig {
            config_path: "mcp_servers.json".to_string(),
            init_timeout: Duration::from_secs(2),
        }
    }
}

/// Conversation-history storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Postgres connection URL; history persistence is disabled when absent
    pub database_url: Option<String>,
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_url: None,
            max_connections: 5,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Load configuration from the default path (`overseer.toml`) plus
/// environment overrides.
pub fn load_config() -> Result<OverseerConfig> {
    load_config_from_path(Path::new("overseer.toml"))
}

/// Load configuration from a specific file, then apply `OVERSEER__*`
/// environment overrides (e.g. `OVERSEER__LLM__MODEL`).
pub fn load_config_from_path(path: &Path) -> Result<OverseerConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("OVERSEER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
