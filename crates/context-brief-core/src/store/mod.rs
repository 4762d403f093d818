//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the seam between the ingestion/retrieval
//! pipeline and whatever stores vectors (in-memory, SQLite, Qdrant).
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ensure_collection`](VectorIndex::ensure_collection) | Create a collection if absent, verify its dimension |
//! | [`upsert_points`](VectorIndex::upsert_points) | Insert or replace points by id |
//! | [`search`](VectorIndex::search) | Nearest neighbours by cosine similarity |
//! | [`delete_document`](VectorIndex::delete_document) | Remove every point of one document |
//!
//! Writers should go through [`upsert_document_points`], which enforces
//! the identity bound, batch dimension, and lazy collection creation.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::CoreError;
use crate::identity::{check_doc_id, PointId};
use crate::models::{Point, PointPayload, Provenance, SearchResult};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend label for logs (e.g. `"sqlite"`).
    fn backend(&self) -> &str;

    /// Create `collection` with `dims`-sized vectors if it does not exist.
    ///
    /// Idempotent. Fails with [`CoreError::DimensionMismatch`] when the
    /// collection exists with a different size.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Insert or replace points. Returns the number written.
    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<usize>;

    /// Return up to `top_k` points ordered by descending similarity.
    ///
    /// Equal scores keep the store's own order.
    async fn search(&self, collection: &str, query: &[f32], top_k: usize)
        -> Result<Vec<SearchResult>>;

    /// Remove every point belonging to `doc_id`.
    async fn delete_document(&self, collection: &str, doc_id: u64) -> Result<()>;
}

/// One embedded segment waiting to be written.
#[derive(Debug, Clone)]
pub struct SegmentVector {
    pub segment_index: u32,
    pub text: String,
    pub vector: Vec<f32>,
    pub provider: Provenance,
}

/// Write all segments of one document, replacing its previous points.
///
/// Rejects the whole batch before touching the store when any segment
/// would exceed the identity bound or carries a vector of the wrong
/// size. Returns the number of points written.
pub async fn upsert_document_points<I>(
    index: &I,
    collection: &str,
    doc_id: u64,
    dims: usize,
    segments: &[SegmentVector],
) -> Result<usize>
where
    I: VectorIndex + ?Sized,
{
    check_doc_id(doc_id)?;
    let points = build_points(doc_id, dims, segments)?;

    index.ensure_collection(collection, dims).await?;
    index.delete_document(collection, doc_id).await?;
    if points.is_empty() {
        return Ok(0);
    }
    index.upsert_points(collection, &points).await
}

fn build_points(doc_id: u64, dims: usize, segments: &[SegmentVector]) -> Result<Vec<Point>, CoreError> {
    segments
        .iter()
        .map(|seg| {
            if seg.vector.len() != dims {
                return Err(CoreError::RaggedBatch {
                    segment_index: seg.segment_index,
                    expected: dims,
                    actual: seg.vector.len(),
                });
            }
            Ok(Point {
                id: PointId::encode(doc_id, seg.segment_index)?,
                vector: seg.vector.clone(),
                payload: PointPayload {
                    doc_id,
                    segment_index: seg.segment_index,
                    text: seg.text.clone(),
                    provider: seg.provider,
                },
            })
        })
        .collect()
}

/// Sort results by descending score, keeping store order on ties.
///
/// NaN scores rank below every finite score.
pub fn rank_results(results: &mut Vec<SearchResult>, top_k: usize) {
    // sort_by is stable
    results.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
    results.truncate(top_k);
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryIndex;
    use super::*;

    fn seg(i: u32, vector: Vec<f32>) -> SegmentVector {
        SegmentVector {
            segment_index: i,
            text: format!("segment {}", i),
            vector,
            provider: Provenance::Real,
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_collection_lazily() {
        let index = InMemoryIndex::new();
        let n = upsert_document_points(&index, "docs", 1, 2, &[seg(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(index.collection_dims("docs"), Some(2));
    }

    #[tokio::test]
    async fn test_upsert_rejects_out_of_range_doc() {
        let index = InMemoryIndex::new();
        let err = upsert_document_points(&index, "docs", 1_000_000, 2, &[seg(0, vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::IdentityOutOfRange { .. })
        ));
        assert_eq!(index.collection_dims("docs"), None);
    }

    #[tokio::test]
    async fn test_upsert_rejects_ragged_batch() {
        let index = InMemoryIndex::new();
        let err = upsert_document_points(
            &index,
            "docs",
            1,
            2,
            &[seg(0, vec![1.0, 0.0]), seg(1, vec![1.0])],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::RaggedBatch { segment_index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_reupsert_replaces_previous_segments() {
        let index = InMemoryIndex::new();
        let first = [seg(0, vec![1.0, 0.0]), seg(1, vec![0.0, 1.0]), seg(2, vec![1.0, 1.0])];
        upsert_document_points(&index, "docs", 5, 2, &first).await.unwrap();
        upsert_document_points(&index, "docs", 5, 2, &[seg(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.point_count("docs"), 1);
    }

    #[test]
    fn test_rank_results_stable_on_ties() {
        let mk = |doc: u64, score: f32| SearchResult {
            doc_id: doc,
            segment_index: 0,
            text: String::new(),
            score,
            provider: Provenance::Real,
        };
        let mut results = vec![mk(1, 0.5), mk(2, 0.9), mk(3, 0.5), mk(4, 0.7)];
        rank_results(&mut results, 10);
        let order: Vec<u64> = results.iter().map(|r| r.doc_id).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_rank_results_puts_nan_last() {
        let mut results: Vec<SearchResult> = (0..200u64)
            .map(|i| SearchResult {
                doc_id: i,
                segment_index: 0,
                text: String::new(),
                score: if i % 7 == 0 { f32::NAN } else { ((i * 37) % 101) as f32 / 100.0 },
                provider: Provenance::Real,
            })
            .collect();
        rank_results(&mut results, 200);

        let finite: Vec<f32> = results
            .iter()
            .map(|r| r.score)
            .take_while(|s| !s.is_nan())
            .collect();
        assert_eq!(finite.len(), 200 - 29);
        assert!(finite.windows(2).all(|w| w[0] >= w[1]));
        assert!(results[finite.len()..].iter().all(|r| r.score.is_nan()));

        let mut top = results.clone();
        rank_results(&mut top, 3);
        assert!(top.iter().all(|r| r.score.is_finite()));
    }
}
