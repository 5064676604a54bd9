//! Response caching for the LLM client
//!
//! Uses moka async cache (Send + Sync, TTL-based eviction). Entries are
//! keyed by a fingerprint over the normalized query, the full rendered
//! system prompt, the sorted tool-name set, and the output schema name; a
//! lookup past the TTL is a miss.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;

/// Deterministic fingerprint of the inputs to one structured call
pub fn fingerprint(
    user_query: &str,
    system_prompt: &str,
    tool_names: &[String],
    schema: &str,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize_query(user_query).hash(&mut hasher);
    system_prompt.hash(&mut hasher);
    for name in tool_names {
        name.hash(&mut hasher);
    }
    schema.hash(&mut hasher);
    hasher.finish()
}

/// Collapse whitespace so trivially reformatted queries share a fingerprint
fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// In-process cache of decoded structured responses
#[derive(Clone)]
pub struct ResponseCache {
    responses: Cache<u64, Value>,
}

impl ResponseCache {
    /// Create a cache with the given capacity and time-to-live
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        ResponseCache {
            responses: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Look up a non-expired entry
    pub async fn get(&self, key: u64) -> Option<Value> {
        self.responses.get(&key).await
    }

    /// Store a decoded response
    pub async fn insert(&self, key: u64, value: Value) {
        self.responses.insert(key, value).await;
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.responses.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = ResponseCache::new(16, Duration::from_secs(60));
        let key = fingerprint("query", "prompt", &[], "AgentResponse");

        assert!(cache.get(key).await.is_none());
        cache.insert(key, json!({"response": "hi"})).await;
        assert_eq!(cache.get(key).await.unwrap()["response"], "hi");
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = ResponseCache::new(16, Duration::from_millis(50));
        let key = fingerprint("query", "prompt", &[], "AgentResponse");

        cache.insert(key, json!({"response": "hi"})).await;
        assert!(cache.get(key).await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(key).await.is_none());
    }

    #[test]
    fn test_fingerprint_sensitivity() {
        let base = fingerprint("q", "p", &["a".into()], "S");
        assert_eq!(base, fingerprint("q", "p", &["a".into()], "S"));
        // Whitespace-normalized queries collide on purpose
        assert_eq!(base, fingerprint("  q  ", "p", &["a".into()], "S"));
        // Any other input perturbs the fingerprint
        assert_ne!(base, fingerprint("q2", "p", &["a".into()], "S"));
        assert_ne!(base, fingerprint("q", "p2", &["a".into()], "S"));
        assert_ne!(base, fingerprint("q", "p", &["b".into()], "S"));
        assert_ne!(base, fingerprint("q", "p", &["a".into()], "S2"));
    }
}
