//! Core data models used throughout Context Brief.
//!
//! These types represent the documents, chunks, points, and context
//! records that flow through the ingestion, retrieval, and assembly
//! pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::PointId;

/// A document handed over by the (external) text extraction step.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: u64,
    pub name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub page_count: u32,
}

/// Search coverage of a stored document.
///
/// A document row can exist without index coverage when the vector
/// store rejected the write; the status makes that state queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Row written, indexing not finished.
    Pending,
    /// Every segment is backed by a real embedding.
    Indexed,
    /// Indexed, but at least one segment carries a fallback embedding.
    Degraded,
    /// The vector store write failed; the document is not searchable.
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Indexed => "indexed",
            IndexStatus::Degraded => "degraded",
            IndexStatus::Failed => "failed",
        }
    }
}

impl FromStr for IndexStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IndexStatus::Pending),
            "indexed" => Ok(IndexStatus::Indexed),
            "degraded" => Ok(IndexStatus::Degraded),
            "failed" => Ok(IndexStatus::Failed),
            other => Err(CoreError::UnknownIndexStatus(other.to_string())),
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A segment of a document's text. Unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub doc_id: u64,
    pub segment_index: u32,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Which embedding path produced a stored vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// A model-backed embedding from the configured provider.
    Real,
    /// A hash-derived pseudo-embedding substituted while the provider was unavailable.
    DeterministicFallback,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Real => "real",
            Provenance::DeterministicFallback => "deterministic-fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Provenance::DeterministicFallback)
    }
}

impl FromStr for Provenance {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real" => Ok(Provenance::Real),
            "deterministic-fallback" => Ok(Provenance::DeterministicFallback),
            other => Err(CoreError::UnknownProvenance(other.to_string())),
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub doc_id: u64,
    pub segment_index: u32,
    pub text: String,
    pub provider: Provenance,
}

/// The vector index storage unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// One ranked passage returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: u64,
    pub segment_index: u32,
    pub text: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    pub provider: Provenance,
}

impl SearchResult {
    pub fn from_payload(payload: PointPayload, score: f32) -> Self {
        Self {
            doc_id: payload.doc_id,
            segment_index: payload.segment_index,
            text: payload.text,
            score,
            provider: payload.provider,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Text,
    Document,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Text => "text",
            ContextKind::Document => "document",
        }
    }
}

impl FromStr for ContextKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContextKind::Text),
            "document" => Ok(ContextKind::Document),
            other => Err(CoreError::UnknownContextKind(other.to_string())),
        }
    }
}

/// A piece of background material supplied by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContextBlock {
    pub owner_id: String,
    pub name: String,
    pub kind: ContextKind,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A past query and a summary of the response it got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub owner_id: String,
    pub query: String,
    pub response_summary: String,
    /// Free-form category, e.g. `"chat"` or `"report"`.
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}
