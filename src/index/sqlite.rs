//! SQLite-backed [`VectorIndex`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in the `points` table
//! and scored in process with cosine similarity. Ties keep `point_id`
//! order, i.e. document then segment order.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use context_brief_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use context_brief_core::models::{Point, PointPayload, SearchResult};
use context_brief_core::store::{rank_results, VectorIndex};
use context_brief_core::CoreError;

use crate::documents::sql_id;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn collection_dims(&self, collection: &str) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims.map(|d| d as usize))
    }

    /// Stored payloads of one document, in segment order.
    pub async fn document_payloads(&self, collection: &str, doc_id: u64) -> Result<Vec<PointPayload>> {
        let rows = sqlx::query(
            "SELECT doc_id, segment_index, text, provider FROM points \
             WHERE collection = ? AND doc_id = ? ORDER BY segment_index",
        )
        .bind(collection)
        .bind(sql_id(doc_id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payload_from_row).collect()
    }
}

fn payload_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PointPayload> {
    let provider: String = row.get("provider");
    Ok(PointPayload {
        doc_id: row.get::<i64, _>("doc_id") as u64,
        segment_index: row.get::<i64, _>("segment_index") as u32,
        text: row.get("text"),
        provider: provider.parse()?,
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, dims, created_at) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(dims as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        let existing = self
            .collection_dims(collection)
            .await?
            .ok_or_else(|| anyhow!("collection '{}' missing after create", collection))?;
        if existing != dims {
            return Err(CoreError::DimensionMismatch {
                collection: collection.to_string(),
                existing,
                requested: dims,
            }
            .into());
        }
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<usize> {
        let dims = self
            .collection_dims(collection)
            .await?
            .ok_or_else(|| anyhow!("collection not found: {}", collection))?;
        if let Some(p) = points.iter().find(|p| p.vector.len() != dims) {
            return Err(CoreError::DimensionMismatch {
                collection: collection.to_string(),
                existing: dims,
                requested: p.vector.len(),
            }
            .into());
        }

        let mut tx = self.pool.begin().await?;
        for point in points {
            sqlx::query(
                r#"
                INSERT INTO points (collection, point_id, doc_id, segment_index, text, provider, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, point_id) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    segment_index = excluded.segment_index,
                    text = excluded.text,
                    provider = excluded.provider,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(sql_id(point.id.as_u64())?)
            .bind(sql_id(point.payload.doc_id)?)
            .bind(point.payload.segment_index)
            .bind(&point.payload.text)
            .bind(point.payload.provider.as_str())
            .bind(vec_to_blob(&point.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(points.len())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(
            "SELECT doc_id, segment_index, text, provider, embedding FROM points \
             WHERE collection = ? ORDER BY point_id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query, &blob_to_vec(&blob));
            results.push(SearchResult::from_payload(payload_from_row(row)?, score));
        }

        rank_results(&mut results, top_k);
        Ok(results)
    }

    async fn delete_document(&self, collection: &str, doc_id: u64) -> Result<()> {
        sqlx::query("DELETE FROM points WHERE collection = ? AND doc_id = ?")
            .bind(collection)
            .bind(sql_id(doc_id)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
