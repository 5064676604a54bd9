//! LLM client: structured output, the tool-call loop, caching, and backoff
//!
//! The client alternates structured generation and tool execution inside a
//! bounded retry loop. Responses are decoded against a declared JSON Schema,
//! cached by input fingerprint, and retried with exponential backoff on
//! transport or decode failures.

mod cache;
mod client;
mod decode;
mod prompt;
mod provider;

pub use cache::ResponseCache;
pub use client::{LlmClient, ToolOutputRecord};
pub use decode::{decode_structured, decode_value};
pub use prompt::{schema_name, schema_string, PromptKwargs, PromptTemplate};
pub use provider::{ModelProvider, OpenRouterProvider};
