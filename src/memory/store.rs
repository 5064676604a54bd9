//! Pooled client for the external vector/document store
//!
//! The store itself is an external collaborator; this backend only speaks
//! its search/add HTTP surface through a bounded pool of client handles.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{MemoryBackend, MemoryMessage};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, Connector};

/// Connector producing HTTP client handles for the store
pub struct StoreConnector {
    base_url: String,
}

#[async_trait]
impl Connector for StoreConnector {
    type Conn = reqwest::Client;

    async fn connect(&self) -> Result<reqwest::Client> {
        debug!("Creating vector store client for {}", self.base_url);
        Ok(reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?)
    }
}

/// [`MemoryBackend`] over an external vector store HTTP API
pub struct VectorStoreBackend {
    pool: ConnectionPool<StoreConnector>,
    base_url: String,
}

impl VectorStoreBackend {
    pub fn new(base_url: impl Into<String>, pool_config: PoolConfig) -> Self {
        let base_url = base_url.into();
        let connector = StoreConnector {
            base_url: base_url.clone(),
        };
        VectorStoreBackend {
            pool: ConnectionPool::new(connector, pool_config),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Pool statistics, for diagnostics
    pub fn pool_stats(&self) -> crate::pool::PoolStats {
        self.pool.stats()
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let handle = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Memory(e.to_string()))?;

        let url = format!("{}/{}", self.base_url, path);
        let outcome = async {
            let response = handle.conn.post(&url).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Memory(format!(
                    "vector store returned {} for {}",
                    status, url
                )));
            }
            Ok(response.json::<Value>().await?)
        }
        .await;

        self.pool.release(handle).await;
        outcome
    }
}

#[async_trait]
impl MemoryBackend for VectorStoreBackend {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Value> {
        self.post(
            "search",
            json!({
                "query": query,
                "user_id": user_id,
                "limit": limit,
                "threshold": threshold,
            }),
        )
        .await
    }

    async fn add(&self, messages: &[MemoryMessage], user_id: &str, metadata: Value) -> Result<()> {
        self.post(
            "add",
            json!({
                "messages": messages,
                "user_id": user_id,
                "metadata": metadata,
            }),
        )
        .await?;
        Ok(())
    }
}
