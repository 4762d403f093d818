//! Document rows: text, metadata, and index coverage status.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use context_brief_core::identity::check_doc_id;
use context_brief_core::models::{Document, IndexStatus};

/// Everything about a document except its body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub doc_id: u64,
    pub name: String,
    pub page_count: u32,
    pub index_status: IndexStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).with_context(|| format!("id {} does not fit in a SQLite integer", id))
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

/// Insert or replace a document row, resetting its status to `pending`.
pub async fn upsert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    check_doc_id(doc.doc_id)?;
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (doc_id, name, body, page_count, index_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'pending', ?, ?)
        ON CONFLICT(doc_id) DO UPDATE SET
            name = excluded.name,
            body = excluded.body,
            page_count = excluded.page_count,
            index_status = 'pending',
            updated_at = excluded.updated_at
        "#,
    )
    .bind(sql_id(doc.doc_id)?)
    .bind(&doc.name)
    .bind(&doc.text)
    .bind(doc.page_count)
    .bind(doc.created_at.timestamp())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_status(pool: &SqlitePool, doc_id: u64, status: IndexStatus) -> Result<()> {
    sqlx::query("UPDATE documents SET index_status = ?, updated_at = ? WHERE doc_id = ?")
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(sql_id(doc_id)?)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_metadata(pool: &SqlitePool, doc_id: u64) -> Result<Option<DocumentMetadata>> {
    let row = sqlx::query(
        "SELECT doc_id, name, page_count, index_status, created_at, updated_at \
         FROM documents WHERE doc_id = ?",
    )
    .bind(sql_id(doc_id)?)
    .fetch_optional(pool)
    .await?;

    row.map(|r| metadata_from_row(&r)).transpose()
}

/// List documents, optionally only those with `status`, ordered by id.
pub async fn list_documents(
    pool: &SqlitePool,
    status: Option<IndexStatus>,
) -> Result<Vec<DocumentMetadata>> {
    let rows = match status {
        Some(s) => {
            sqlx::query(
                "SELECT doc_id, name, page_count, index_status, created_at, updated_at \
                 FROM documents WHERE index_status = ? ORDER BY doc_id",
            )
            .bind(s.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT doc_id, name, page_count, index_status, created_at, updated_at \
                 FROM documents ORDER BY doc_id",
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(metadata_from_row).collect()
}

/// Delete the row. Returns whether it existed.
pub async fn delete_document(pool: &SqlitePool, doc_id: u64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE doc_id = ?")
        .bind(sql_id(doc_id)?)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn metadata_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentMetadata> {
    let doc_id: i64 = row.get("doc_id");
    let status: String = row.get("index_status");
    Ok(DocumentMetadata {
        doc_id: doc_id as u64,
        name: row.get("name"),
        page_count: row.get::<i64, _>("page_count") as u32,
        index_status: status.parse()?,
        created_at: from_ts(row.get("created_at")),
        updated_at: from_ts(row.get("updated_at")),
    })
}
