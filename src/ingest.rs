//! Ingestion pipeline: document → chunks → embeddings → vector index.
//!
//! Embedding outages never abort ingestion (the [`Embedder`] falls back
//! to tagged hash vectors). A vector store failure is logged and leaves
//! the document row with `index_status = failed`; there is no retry
//! here.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use context_brief_core::chunk::chunk_document;
use context_brief_core::identity::check_doc_id;
use context_brief_core::models::{Document, IndexStatus};
use context_brief_core::store::{upsert_document_points, SegmentVector, VectorIndex};
use context_brief_core::CoreError;

use crate::cache::DocumentMetadataCache;
use crate::config::ChunkingConfig;
use crate::documents;
use crate::embedding::Embedder;
use crate::models::{IndexRequest, IndexResponse};

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub doc_id: u64,
    pub segments: usize,
    pub upserted: usize,
    pub fallback_segments: usize,
    pub status: IndexStatus,
    /// Index error message when `status` is `failed`.
    pub error: Option<String>,
}

pub struct Ingestor {
    pool: SqlitePool,
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    chunking: ChunkingConfig,
    cache: Arc<DocumentMetadataCache>,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        chunking: ChunkingConfig,
        cache: Arc<DocumentMetadataCache>,
    ) -> Self {
        Self {
            pool,
            embedder,
            index,
            collection: collection.into(),
            chunking,
            cache,
        }
    }

    /// Embed and store pre-split segments, replacing the document's points.
    pub async fn index_segments(&self, request: &IndexRequest) -> Result<IndexResponse> {
        request.validate()?;
        let (response, _) = self.write_segments(request.doc_id, &request.segments).await?;
        Ok(response)
    }

    /// Returns the response and the number of fallback-embedded segments.
    async fn write_segments(&self, doc_id: u64, texts: &[String]) -> Result<(IndexResponse, usize)> {
        let batch = self.embedder.embed(texts).await;
        let provider = batch.overall_provenance();
        let fallback_segments = batch.fallback_count();

        let segments: Vec<SegmentVector> = texts
            .iter()
            .zip(batch.vectors)
            .zip(batch.provenance)
            .enumerate()
            .map(|(i, ((text, vector), provider))| SegmentVector {
                segment_index: i as u32,
                text: text.clone(),
                vector,
                provider,
            })
            .collect();

        let dims = self.embedder.dims();
        let upserted =
            upsert_document_points(self.index.as_ref(), &self.collection, doc_id, dims, &segments)
                .await?;

        let response = IndexResponse {
            upserted,
            embedding_dim: dims,
            provider,
        };
        Ok((response, fallback_segments))
    }

    /// Store, chunk, embed, and index one document.
    ///
    /// Errors only for input that can never be indexed (empty text,
    /// out-of-range id) or a database failure. A vector store failure
    /// yields `Ok` with `status = failed`.
    pub async fn ingest_document(&self, doc: &Document) -> Result<IngestReport> {
        check_doc_id(doc.doc_id)?;
        if doc.text.trim().is_empty() {
            return Err(CoreError::EmptyDocument(doc.doc_id).into());
        }

        documents::upsert_document(&self.pool, doc).await?;
        self.cache.invalidate(doc.doc_id);

        let chunks = chunk_document(
            doc.doc_id,
            &doc.text,
            self.chunking.chunk_size,
            self.chunking.overlap,
        );
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();

        let report = match self.write_segments(doc.doc_id, &texts).await {
            Ok((resp, fallback_segments)) => {
                let status = if resp.provider.is_fallback() {
                    IndexStatus::Degraded
                } else {
                    IndexStatus::Indexed
                };
                IngestReport {
                    doc_id: doc.doc_id,
                    segments: texts.len(),
                    upserted: resp.upserted,
                    fallback_segments,
                    status,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    doc_id = doc.doc_id,
                    backend = self.index.backend(),
                    collection = %self.collection,
                    error = %e,
                    "vector index write failed, document marked failed"
                );
                IngestReport {
                    doc_id: doc.doc_id,
                    segments: texts.len(),
                    upserted: 0,
                    fallback_segments: 0,
                    status: IndexStatus::Failed,
                    error: Some(format!("{:#}", e)),
                }
            }
        };

        documents::set_status(&self.pool, doc.doc_id, report.status).await?;
        info!(
            doc_id = doc.doc_id,
            segments = report.segments,
            status = %report.status,
            "document ingested"
        );
        Ok(report)
    }

    /// Remove a document row and every point it owns.
    ///
    /// Points go first so a failure never leaves orphaned vectors
    /// behind a deleted row. Returns whether the row existed.
    pub async fn delete_document(&self, doc_id: u64) -> Result<bool> {
        check_doc_id(doc_id)?;
        self.index.delete_document(&self.collection, doc_id).await?;
        let existed = documents::delete_document(&self.pool, doc_id).await?;
        self.cache.invalidate(doc_id);
        info!(doc_id, existed, "document deleted");
        Ok(existed)
    }
}
