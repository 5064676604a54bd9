//! Structured agent responses
//!
//! Every agent response carries at least a `response` text and a
//! `diagnostics` block. A `tool_calls` field drives the tool-call loop;
//! agent-declared extra fields (e.g. follow-up queries) are preserved in
//! `extra`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolInvocation;

/// Model self-reporting attached to every structured response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostics {
    /// Reasoning steps the model chose to surface
    #[serde(default)]
    pub thoughts: Vec<String>,
    /// Model confidence in [0, 1]
    #[serde(default)]
    pub confidence: f32,
}

/// The default structured response decoded from agent calls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentResponse {
    /// Primary textual output
    #[serde(default)]
    pub response: String,

    /// Model self-reporting
    #[serde(default)]
    pub diagnostics: Diagnostics,

    /// Tool calls requested by the model; presence continues the loop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,

    /// Agent-declared extra fields, e.g. a follow-up-queries list
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentResponse {
    /// Build a plain text response (used by tests and fallbacks)
    pub fn from_text(text: impl Into<String>) -> Self {
        AgentResponse {
            response: text.into(),
            ..Default::default()
        }
    }

    /// Read an agent-declared list of follow-up queries from `extra`
    pub fn follow_up_queries(&self, key: &str) -> Vec<String> {
        match self.extra.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}
