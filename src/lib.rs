//! # Overseer
//!
//! An agent orchestration runtime built with Rust.
//!
//! Overseer takes a natural-language query, decomposes it into a DAG of
//! tasks, routes each task to a specialized agent from a registry, and
//! executes the DAG with controlled concurrency while streaming tool
//! invocations through a retrying, caching LLM client.
//!
//! ## Architecture
//!
//! - **LLM client** (`llm`): structured-output generation, the tool-call
//!   loop, response caching, and exponential backoff
//! - **Tasks** (`tasks`): the task model, dependency-tracking store, and
//!   layered DAG scheduler
//! - **Delegation** (`delegate`): the generate → assign → execute → report
//!   pipeline, agent routing, and report generation
//! - **Agents** (`agent`): capability providers, each a prompt, an output
//!   schema, and a tool registry
//! - **Tools** (`tools`): the tool trait and registry exposed to the model
//! - **Process supervision** (`process`): child MCP-server processes with
//!   bounded output buffers and lifecycle callbacks
//! - **Connection pool** (`pool`): a bounded pool for heavyweight client
//!   handles with idle expiry
//! - **MCP** (`mcp`): server registry configuration, wire protocol, and
//!   tool discovery
//! - **Memory** (`memory`): semantic memory retrieval and storage around
//!   agent calls
//! - **History** (`history`): conversation persistence behind an opaque
//!   SQL interface
//!
//! ## Design Principles
//!
//! 1. **Explicit context**: no global singletons; an [`context::Context`]
//!    owns the clients and pools and is threaded through the pipeline
//! 2. **Cooperative concurrency**: a single tokio runtime drives model
//!    calls, tool I/O, and process streams
//! 3. **Errors as data at the tool boundary**: tool failures are fed back
//!    to the model, never raised out of the loop

// Agent model and registry
pub mod agent;

// Configuration
pub mod config;

// Explicit runtime context (replaces module-global singletons)
pub mod context;

// Delegation pipeline: generate -> assign -> execute -> report
pub mod delegate;

// Error types
pub mod error;

// Conditional state graph driving the pipeline
pub mod graph;

// Conversation-history persistence
pub mod history;

// LLM client: structured output, tool-call loop, cache, backoff
pub mod llm;

// MCP server configuration, protocol, and tool discovery
pub mod mcp;

// Semantic memory integration
pub mod memory;

// Bounded pool for heavyweight client handles
pub mod pool;

// Async child-process supervision
pub mod process;

// Prompt templates and their response models
pub mod prompts;

// Task model, store, and DAG scheduler
pub mod tasks;

// Tool trait and registry
pub mod tools;

// Re-export commonly used items
pub use error::{Error, Result};

pub use agent::{Agent, AgentRegistry};
pub use llm::LlmClient;
pub use tasks::{Task, TaskManager};
pub use tools::{Tool, ToolRegistry, ToolResult};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
