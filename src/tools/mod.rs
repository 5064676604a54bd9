//! Tools available to agents
//!
//! A tool is a named callable exposed to the model: arguments are a
//! structured record, output is a structured record. Registries map
//! tool names to callables and render their declarations into prompts.

mod registry;
mod traits;

pub use registry::ToolRegistry;
pub use traits::{Tool, ToolInvocation, ToolResult, ToolSpec};
