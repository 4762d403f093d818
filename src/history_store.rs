//! Persistent conversation history.
//!
//! Both stores keep at most `capacity` records per owner and evict the
//! oldest first, the same rule as
//! [`ConversationLog`](context_brief_core::history::ConversationLog).
//! The SQLite store appends and evicts in one transaction, so readers
//! never see more than `capacity` rows.

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tokio::sync::Mutex;

use context_brief_core::history::ConversationLog;
use context_brief_core::models::ConversationRecord;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a record, evicting the owner's oldest beyond capacity.
    async fn append(&self, record: &ConversationRecord) -> Result<()>;

    /// The owner's records, oldest first.
    async fn list(&self, owner_id: &str) -> Result<Vec<ConversationRecord>>;
}

pub struct SqliteConversationStore {
    pool: SqlitePool,
    capacity: usize,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool, capacity: usize) -> Self {
        Self {
            pool,
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(&self, record: &ConversationRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_records (owner_id, query, response_summary, kind, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.owner_id)
        .bind(&record.query)
        .bind(&record.response_summary)
        .bind(&record.kind)
        .bind(record.timestamp.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        // Keep the newest `capacity` by insertion order
        sqlx::query(
            r#"
            DELETE FROM conversation_records
            WHERE owner_id = ?
              AND id NOT IN (
                  SELECT id FROM conversation_records
                  WHERE owner_id = ?
                  ORDER BY id DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(&record.owner_id)
        .bind(&record.owner_id)
        .bind(self.capacity as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            "SELECT owner_id, query, response_summary, kind, timestamp \
             FROM conversation_records WHERE owner_id = ? ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationRecord {
                owner_id: row.get("owner_id"),
                query: row.get("query"),
                response_summary: row.get("response_summary"),
                kind: row.get("kind"),
                timestamp: DateTime::from_timestamp_millis(row.get("timestamp")).unwrap_or_default(),
            })
            .collect())
    }
}

/// Process-local store, one [`ConversationLog`] per owner.
pub struct InMemoryConversationStore {
    capacity: usize,
    logs: Mutex<HashMap<String, ConversationLog>>,
}

impl InMemoryConversationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            logs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, record: &ConversationRecord) -> Result<()> {
        let mut logs = self.logs.lock().await;
        logs.entry(record.owner_id.clone())
            .or_insert_with(|| ConversationLog::new(self.capacity))
            .push(record.clone());
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<ConversationRecord>> {
        let logs = self.logs.lock().await;
        Ok(logs.get(owner_id).map(ConversationLog::to_vec).unwrap_or_default())
    }
}
