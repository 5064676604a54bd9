//! Semantic memory integration
//!
//! Before each initial agent call the executor retrieves relevant entries
//! and injects them as a `memory_context` prompt slot; after each call the
//! (query, response) pair is stored back. Memory failures are logged and
//! never fail the call, and `memory_context` is always set (empty string
//! when unavailable).

mod store;

pub use store::VectorStoreBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::Result;

/// One conversation message stored into memory
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryMessage {
    pub role: String,
    pub content: String,
}

/// A retrieved memory entry
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub text: String,
    pub score: Option<f64>,
}

/// The external semantic store, e.g. a vector database
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Search for entries relevant to the query. The result shape varies by
    /// backend: either a raw list or a `{"results": [...]}` wrapper.
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Value>;

    /// Store a conversation exchange
    async fn add(&self, messages: &[MemoryMessage], user_id: &str, metadata: Value) -> Result<()>;
}

/// Memory retrieval and storage around agent calls
pub struct SemanticMemory {
    backend: Arc<dyn MemoryBackend>,
    config: MemoryConfig,
}

impl SemanticMemory {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: MemoryConfig) -> Self {
        SemanticMemory { backend, config }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Retrieve entries relevant to the query; failures and malformed data
    /// yield an empty list.
    pub async fn retrieve_relevant(&self, user_query: &str) -> Vec<MemoryHit> {
        if !self.config.enabled {
            return Vec::new();
        }

        let preview: String = user_query.chars().take(100).collect();
        debug!("Searching memory for query: {}", preview);

        match self
            .backend
            .search(
                user_query,
                &self.config.user_id,
                self.config.search_limit,
                self.config.similarity_threshold,
            )
            .await
        {
            Ok(value) => {
                let hits = parse_hits(&value);
                info!("Found {} relevant memories", hits.len());
                hits
            }
            Err(e) => {
                warn!("Memory search failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Format retrieved entries into a prompt context block; empty string
    /// for no hits.
    pub fn format_context(&self, hits: &[MemoryHit]) -> String {
        if hits.is_empty() {
            return String::new();
        }

        let mut lines = vec!["## Relevant Context from Previous Interactions:".to_string()];
        for (index, hit) in hits.iter().enumerate() {
            let mut text = sanitize(&hit.text);
            if text.len() > 200 {
                text = format!("{}...", text.chars().take(200).collect::<String>());
            }
            let score = hit
                .score
                .map(|s| format!("{s:.2}"))
                .unwrap_or_else(|| "N/A".to_string());
            lines.push(format!("{}. {} (relevance: {})", index + 1, text, score));
        }
        lines.push("---".to_string());
        lines.join("\n")
    }

    /// Store an exchange; failures are logged, never surfaced
    pub async fn store_interaction(
        &self,
        user_query: &str,
        response: &str,
        agent_name: &str,
        metadata: Value,
    ) {
        if !self.config.enabled {
            return;
        }

        let messages = [
            MemoryMessage {
                role: "user".to_string(),
                content: user_query.to_string(),
            },
            MemoryMessage {
                role: "assistant".to_string(),
                content: response.to_string(),
            },
        ];

        let mut meta = match metadata {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        meta.insert("agent_name".into(), Value::String(agent_name.to_string()));
        meta.insert(
            "interaction_type".into(),
            Value::String("agent_execution".to_string()),
        );

        if let Err(e) = self
            .backend
            .add(&messages, &self.config.user_id, Value::Object(meta))
            .await
        {
            warn!("Failed to store interaction memory: {}", e);
        }
    }
}

/// Parse a backend search result, accepting either a raw list or a
/// `{"results": [...]}` wrapper; anything else is empty.
fn parse_hits(value: &Value) -> Vec<MemoryHit> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("results") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => {
                warn!("Unexpected memory result shape: object without results list");
                return Vec::new();
            }
        },
        _ => {
            warn!("Unexpected memory result shape: {}", value);
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => {
                let text = map
                    .get("memory")
                    .or_else(|| map.get("text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| item.to_string());
                let score = map
                    .get("score")
                    .or_else(|| map.get("similarity"))
                    .and_then(Value::as_f64);
                Some(MemoryHit { text, score })
            }
            Value::String(text) => Some(MemoryHit {
                text: text.clone(),
                score: None,
            }),
            _ => None,
        })
        .collect()
}

/// Strip characters that would break prompt templates or JSON payloads
fn sanitize(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
        .replace('"', "'")
        .replace('{', "(")
        .replace('}', ")")
        .trim()
        .to_string()
}
