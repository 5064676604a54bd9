//! The LLM client driving the generate/act loop
//!
//! `fcall` alternates structured generation and tool execution for up to
//! `max_retries` iterations. Tool calls within one iteration run
//! concurrently (bounded), their outputs are deduplicated and folded back
//! into the user query, and the loop exits early when the model stops
//! requesting tools or repeats itself verbatim. Transport and decode
//! failures retry with exponential backoff; final responses are cached by
//! input fingerprint.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::cache::{fingerprint, ResponseCache};
use super::decode::{decode_structured, decode_value};
use super::prompt::{schema_name, PromptKwargs, PromptTemplate};
use super::provider::ModelProvider;
use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::tools::{ToolInvocation, ToolRegistry};

/// One executed tool call as fed back to the model
#[derive(Debug, Clone)]
pub struct ToolOutputRecord {
    pub name: String,
    pub output: Value,
    pub error: Option<String>,
}

/// Structured-output LLM client with tool-calling, caching, and backoff
pub struct LlmClient {
    provider: Arc<dyn ModelProvider>,
    config: LlmConfig,
    cache: ResponseCache,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn ModelProvider>, config: LlmConfig) -> Self {
        let cache = ResponseCache::new(config.cache_capacity, config.cache_ttl);
        LlmClient {
            provider,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Single structured call without tool execution
    pub async fn call<T>(
        &self,
        user_query: &str,
        prompt: &PromptTemplate,
        kwargs: &PromptKwargs,
    ) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        self.fcall(user_query, prompt, None, kwargs).await
    }

    /// Structured call running the full tool-call loop
    pub async fn fcall<T>(
        &self,
        user_query: &str,
        prompt: &PromptTemplate,
        tools: Option<&ToolRegistry>,
        kwargs: &PromptKwargs,
    ) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        // The memory_context slot must always exist; templates render in
        // strict mode.
        let mut kwargs = kwargs.clone();
        kwargs
            .entry("memory_context".to_string())
            .or_insert_with(|| Value::String(String::new()));

        let system_prompt = prompt.build::<T>(&kwargs, tools)?;
        let tool_names = tools.map(|t| t.sorted_names()).unwrap_or_default();
        let schema = schema_name::<T>();

        let key = fingerprint(user_query, &system_prompt, &tool_names, &schema);
        if let Some(hit) = self.cache.get(key).await {
            debug!("Response cache hit for schema {}", schema);
            return decode_structured(hit, "<cached>");
        }

        let budget = self.config.call_timeout;
        let (decoded, value) = tokio::time::timeout(
            budget,
            self.run_loop::<T>(user_query, &system_prompt, tools),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("llm_call[{}]", schema),
            budget_secs: budget.as_secs(),
        })??;

        self.cache.insert(key, value).await;
        Ok(decoded)
    }

    /// The generate/act loop
    async fn run_loop<T>(
        &self,
        user_query: &str,
        system_prompt: &str,
        tools: Option<&ToolRegistry>,
    ) -> Result<(T, Value)>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        let max_retries = self.config.max_retries;
        let registry = tools.filter(|t| !t.is_empty());

        let mut accumulated: Vec<ToolOutputRecord> = Vec::new();
        let mut prev_raw: Option<String> = None;
        let mut no_progress: u32 = 0;
        let mut last_error: Option<Error> = None;
        let mut attempt: u32 = 0;

        while attempt < max_retries {
            if last_error.is_some() {
                let delay = self.backoff_delay(attempt);
                if !delay.is_zero() {
                    debug!("Backing off {:?} before retry {}", delay, attempt);
                    tokio::time::sleep(delay).await;
                }
            }

            let query = format_query_with_results(user_query, &accumulated);
            let raw = match self.provider.generate(system_prompt, &query).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Model call failed on attempt {}: {}", attempt, e);
                    last_error = Some(e);
                    attempt += 1;
                    continue;
                }
            };

            let value = match decode_value(&raw) {
                Ok(v) => {
                    last_error = None;
                    v
                }
                Err(e) => {
                    warn!("Undecodable model output on attempt {}: {}", attempt, e);
                    last_error = Some(e);
                    attempt += 1;
                    continue;
                }
            };

            // Byte-identical output across consecutive iterations means the
            // model is not making progress.
            if prev_raw.as_deref() == Some(raw.as_str()) {
                no_progress += 1;
            } else {
                no_progress = 0;
            }
            prev_raw = Some(raw.clone());

            let calls = extract_tool_calls(&value);
            if let Some(registry) = registry {
                if !calls.is_empty() {
                    if no_progress >= 2 {
                        warn!("Model repeated identical output; exiting tool loop early");
                    } else if attempt + 1 < max_retries {
                        info!(
                            "Model requested {} tool calls (iteration {})",
                            calls.len(),
                            attempt
                        );
                        let outputs = self.execute_tool_calls(&calls, registry).await;
                        add_unique_results(&mut accumulated, outputs);
                        truncate_accumulated(&mut accumulated, self.config.max_accumulated_results);
                        attempt += 1;
                        continue;
                    }
                }
            }

            match decode_structured::<T>(value.clone(), &raw) {
                Ok(decoded) => return Ok((decoded, value)),
                Err(e) => {
                    warn!("Schema decode failed on attempt {}: {}", attempt, e);
                    last_error = Some(e);
                    attempt += 1;
                    continue;
                }
            }
        }

        match last_error {
            Some(e @ Error::LlmResponse { .. }) => Err(e),
            Some(e) => Err(Error::RetryExhausted {
                attempts: max_retries,
                last_error: e.to_string(),
            }),
            None => Err(Error::RetryExhausted {
                attempts: max_retries,
                last_error: "loop ended without a model response".to_string(),
            }),
        }
    }

    /// Execute one iteration's tool calls, bounded-concurrently, preserving
    /// request order in the output. Per-tool failures become records, never
    /// errors.
    async fn execute_tool_calls(
        &self,
        calls: &[ToolInvocation],
        registry: &ToolRegistry,
    ) -> Vec<ToolOutputRecord> {
        stream::iter(calls.iter().cloned())
            .map(|call| async move {
                info!("Executing tool: {}", call.name);
                match registry.execute(&call).await {
                    Ok(result) if result.success => ToolOutputRecord {
                        name: call.name,
                        output: result.content.unwrap_or(Value::Null),
                        error: None,
                    },
                    Ok(result) => {
                        let message = result.error.unwrap_or_default();
                        warn!("Tool {} failed: {}", call.name, message);
                        ToolOutputRecord {
                            name: call.name,
                            output: Value::String(format!("Error: {}", message)),
                            error: Some(message),
                        }
                    }
                    Err(e) => {
                        warn!("Tool {} raised: {}", call.name, e);
                        ToolOutputRecord {
                            name: call.name,
                            output: Value::String(format!("Error: {}", e)),
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .buffered(self.config.max_parallel_tools)
            .collect()
            .await
    }

    /// `min(base * 2^retry + jitter, max_backoff)`; retry 0 has zero delay
    fn backoff_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let base = self.config.backoff_base.as_secs_f64();
        let jitter = rand::rng().random_range(0.0..base.max(f64::EPSILON));
        let delay = base * 2f64.powi(retry as i32) + jitter;
        Duration::from_secs_f64(delay.min(self.config.max_backoff.as_secs_f64()))
    }
}

/// Pull the `tool_calls` list out of a decoded response, skipping records
/// that do not parse.
fn extract_tool_calls(value: &Value) -> Vec<ToolInvocation> {
    match value.get("tool_calls") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(call) => Some(call),
                Err(e) => {
                    warn!("Skipping malformed tool call {}: {}", item, e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Reformat the user query with the accumulated tool outputs
fn format_query_with_results(user_query: &str, results: &[ToolOutputRecord]) -> String {
    if results.is_empty() {
        return user_query.to_string();
    }

    let mut query = format!("{}\n\nTool Calls Results:", user_query);
    for record in results {
        let rendered = match &record.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        query.push_str(&format!("\n{}: {}", record.name, rendered));
    }
    query
}

/// Append records whose (name, output) pair is not already present
fn add_unique_results(existing: &mut Vec<ToolOutputRecord>, new: Vec<ToolOutputRecord>) {
    for record in new {
        let key = canonicalize(&record.output);
        let duplicate = existing
            .iter()
            .any(|r| r.name == record.name && canonicalize(&r.output) == key);
        if !duplicate {
            existing.push(record);
        }
    }
}

/// Drop the oldest records so at most `max` remain
fn truncate_accumulated(results: &mut Vec<ToolOutputRecord>, max: usize) {
    if results.len() > max {
        let excess = results.len() - max;
        results.drain(0..excess);
    }
}

/// Normalize a value for equality checks: objects get sorted keys
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
