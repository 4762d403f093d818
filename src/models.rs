//! Request and response types for the external interfaces.
//!
//! These are the serde shapes exchanged with the HTTP server, the
//! primary user context service, and the CLI's JSON output. Validation
//! happens here so every surface rejects the same inputs.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use context_brief_core::budget::GroupReport;
use context_brief_core::identity::{check_doc_id, SEGMENT_BOUND};
use context_brief_core::models::{ContextKind, ConversationRecord, Document, Provenance};

/// Index write: embed and store pre-split segments of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub doc_id: u64,
    pub segments: Vec<String>,
}

impl IndexRequest {
    pub fn validate(&self) -> Result<()> {
        check_doc_id(self.doc_id)?;
        if self.segments.is_empty() {
            bail!("segments must not be empty");
        }
        if self.segments.len() as u64 > SEGMENT_BOUND {
            bail!(
                "too many segments: {} (limit {})",
                self.segments.len(),
                SEGMENT_BOUND
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResponse {
    pub upserted: usize,
    pub embedding_dim: usize,
    /// `deterministic-fallback` if any segment used the fallback.
    pub provider: Provenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Defaults to `retrieval.top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Body of `GET {base}/users/{owner_id}/contexts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContextResponse {
    pub contexts: Vec<RemoteContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteContext {
    pub name: String,
    pub kind: ContextKind,
    pub content: String,
}

/// The single-slot context kept per owner in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyUserContext {
    pub kind: ContextKind,
    pub content: String,
    /// Short excerpt for listings.
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whole-document ingestion: the text is chunked server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub doc_id: u64,
    pub name: String,
    pub text: String,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
}

fn default_page_count() -> u32 {
    1
}

impl IngestRequest {
    pub fn validate(&self) -> Result<()> {
        check_doc_id(self.doc_id)?;
        if self.name.trim().is_empty() {
            bail!("name must not be empty");
        }
        if self.text.trim().is_empty() {
            bail!("text must not be empty");
        }
        Ok(())
    }

    pub fn into_document(self) -> Document {
        Document {
            doc_id: self.doc_id,
            name: self.name,
            text: self.text,
            created_at: Utc::now(),
            page_count: self.page_count,
        }
    }
}

/// Replace an owner's legacy single-slot context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContextRequest {
    #[serde(default = "default_context_kind")]
    pub kind: ContextKind,
    pub content: String,
}

fn default_context_kind() -> ContextKind {
    ContextKind::Text
}

/// Conversation append. `timestamp` defaults to now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationAppend {
    pub owner_id: String,
    pub query: String,
    pub response_summary: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_kind() -> String {
    "chat".to_string()
}

impl ConversationAppend {
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            bail!("owner_id must not be empty");
        }
        if self.query.trim().is_empty() {
            bail!("query must not be empty");
        }
        Ok(())
    }

    pub fn into_record(self) -> ConversationRecord {
        ConversationRecord {
            owner_id: self.owner_id,
            query: self.query,
            response_summary: self.response_summary,
            kind: self.kind,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequest {
    pub owner_id: String,
    pub query: String,
}

/// Assembled context plus a per-group account of what made it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub groups: Vec<GroupReport>,
    /// Sources that failed, timed out, or fell back, e.g. `"user_context:legacy"`.
    pub degraded_sources: Vec<String>,
}
