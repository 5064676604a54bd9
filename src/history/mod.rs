//! Conversation-history persistence
//!
//! The core consumes an opaque SQL interface: create a conversation, add
//! messages, record agent sessions, and read back recent history. Backed
//! by PostgreSQL through sqlx; schema details stay internal to this
//! module.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// One persisted conversation message
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// SQL-backed conversation store
pub struct ConversationStore {
    pool: PgPool,
}

impl ConversationStore {
    /// Connect and ensure the schema exists
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| Error::Config("history persistence requires database_url".into()))?;

        info!("Connecting conversation store");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(url)
            .await?;

        let store = ConversationStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                session_id TEXT PRIMARY KEY,
                agent_name TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                meta JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES conversations(session_id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                meta JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_sessions (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                query TEXT NOT NULL,
                response TEXT NOT NULL,
                tool_calls JSONB NOT NULL DEFAULT '[]',
                execution_time_ms BIGINT NOT NULL,
                success BOOLEAN NOT NULL,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a conversation if it does not exist yet
    pub async fn create_conversation(
        &self,
        session_id: &str,
        agent_name: &str,
        title: &str,
        meta: Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (session_id, agent_name, title, meta)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(session_id)
        .bind(agent_name)
        .bind(title)
        .bind(meta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append a message to a conversation
    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        meta: Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (session_id, role, content, meta) VALUES ($1, $2, $3, $4)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(meta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one agent execution with its outcome
    #[allow(clippy::too_many_arguments)]
    pub async fn add_agent_session(
        &self,
        session_id: &str,
        agent_name: &str,
        query: &str,
        response: &str,
        tool_calls: Value,
        execution_time_ms: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_sessions
             (session_id, agent_name, query, response, tool_calls, execution_time_ms, success, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session_id)
        .bind(agent_name)
        .bind(query)
        .bind(response)
        .bind(tool_calls)
        .bind(execution_time_ms)
        .bind(success)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read back the most recent messages of a conversation, oldest first
    pub async fn get_conversation_history(
        &self,
        session_id: &str,
        max_messages: i64,
    ) -> Result<Vec<HistoryMessage>> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM (
                 SELECT role, content, created_at FROM messages
                 WHERE session_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2
             ) recent ORDER BY created_at ASC",
        )
        .bind(session_id)
        .bind(max_messages)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryMessage {
                role: row.get("role"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
