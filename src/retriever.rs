//! Failure-tolerant semantic search.
//!
//! [`Retriever::search`] is the only read path into the vector index.
//! Embedding errors, index errors, malformed upstream responses, and
//! timeouts all produce an empty result, a `warn!` line, and a bump of
//! the degradation counter. Nothing propagates to the caller.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use context_brief_core::models::SearchResult;
use context_brief_core::store::{rank_results, VectorIndex};

use crate::embedding::Embedder;

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// Failure reason when the search degraded to empty.
    pub degraded: Option<String>,
}

pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    timeout: Duration,
    degradations: AtomicU64,
}

impl Retriever {
    pub fn new(
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            timeout,
            degradations: AtomicU64::new(0),
        }
    }

    /// Up to `top_k` passages, most similar first. Never fails.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        self.search_outcome(query, top_k).await.results
    }

    /// Like [`search`](Self::search), also saying why results may be missing.
    pub async fn search_outcome(&self, query: &str, top_k: usize) -> SearchOutcome {
        if query.trim().is_empty() || top_k == 0 {
            return SearchOutcome::default();
        }

        let failure = match tokio::time::timeout(self.timeout, self.try_search(query, top_k)).await {
            Ok(Ok(mut results)) => {
                rank_results(&mut results, top_k);
                debug!(results = results.len(), "retrieval complete");
                return SearchOutcome {
                    results,
                    degraded: None,
                };
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("timed out after {:?}", self.timeout),
        };

        self.degrade(&failure);
        SearchOutcome {
            results: Vec::new(),
            degraded: Some(failure),
        }
    }

    async fn try_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let vector = self.embedder.embed_query(query).await?;
        self.index.search(&self.collection, &vector, top_k).await
    }

    fn degrade(&self, reason: &str) {
        let total = self.degradations.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            backend = self.index.backend(),
            collection = %self.collection,
            degradations = total,
            reason,
            "retrieval degraded, returning no passages"
        );
    }

    /// Searches that returned empty because of a failure.
    pub fn degradation_count(&self) -> u64 {
        self.degradations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use anyhow::bail;
    use async_trait::async_trait;
    use context_brief_core::models::{Point, Provenance};
    use context_brief_core::store::memory::InMemoryIndex;
    use context_brief_core::store::{upsert_document_points, SegmentVector};

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        fn backend(&self) -> &str {
            "failing"
        }
        async fn ensure_collection(&self, _: &str, _: usize) -> Result<()> {
            bail!("connection refused")
        }
        async fn upsert_points(&self, _: &str, _: &[Point]) -> Result<usize> {
            bail!("connection refused")
        }
        async fn search(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<SearchResult>> {
            bail!("503 Service Unavailable")
        }
        async fn delete_document(&self, _: &str, _: u64) -> Result<()> {
            bail!("connection refused")
        }
    }

    struct SlowIndex;

    #[async_trait]
    impl VectorIndex for SlowIndex {
        fn backend(&self) -> &str {
            "slow"
        }
        async fn ensure_collection(&self, _: &str, _: usize) -> Result<()> {
            Ok(())
        }
        async fn upsert_points(&self, _: &str, points: &[Point]) -> Result<usize> {
            Ok(points.len())
        }
        async fn search(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<SearchResult>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
        async fn delete_document(&self, _: &str, _: u64) -> Result<()> {
            Ok(())
        }
    }

    fn embedder(provider: &str) -> Arc<Embedder> {
        let config = EmbeddingConfig {
            provider: provider.to_string(),
            dims: Some(16),
            ..EmbeddingConfig::default()
        };
        Arc::new(Embedder::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_finds_identical_text_with_hash_embeddings() {
        let embedder = embedder("hash");
        let index = Arc::new(InMemoryIndex::new());
        let texts = ["liquidity ratios fell", "retail sales rose"];
        let segments: Vec<SegmentVector> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| SegmentVector {
                segment_index: i as u32,
                text: t.to_string(),
                vector: context_brief_core::embedding::hash_embedding(t, 16),
                provider: Provenance::DeterministicFallback,
            })
            .collect();
        upsert_document_points(index.as_ref(), "docs", 1, 16, &segments)
            .await
            .unwrap();

        let retriever = Retriever::new(embedder, index, "docs", Duration::from_secs(1));
        let results = retriever.search("retail sales rose", 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].segment_index, 1);
        assert_eq!(retriever.degradation_count(), 0);
    }

    #[tokio::test]
    async fn test_index_error_yields_empty() {
        let retriever = Retriever::new(embedder("hash"), Arc::new(FailingIndex), "docs", Duration::from_secs(1));
        let outcome = retriever.search_outcome("banking risk", 5).await;
        assert!(outcome.results.is_empty());
        assert!(outcome.degraded.unwrap().contains("503"));
        assert_eq!(retriever.degradation_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_empty() {
        let retriever = Retriever::new(embedder("hash"), Arc::new(SlowIndex), "docs", Duration::from_millis(50));
        assert!(retriever.search("banking risk", 5).await.is_empty());
        assert_eq!(retriever.degradation_count(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_yields_empty() {
        let retriever = Retriever::new(
            embedder("disabled"),
            Arc::new(InMemoryIndex::new()),
            "docs",
            Duration::from_secs(1),
        );
        assert!(retriever.search("banking risk", 5).await.is_empty());
        assert_eq!(retriever.degradation_count(), 1);
    }

    #[tokio::test]
    async fn test_blank_query_and_zero_k_skip_upstream() {
        let retriever = Retriever::new(embedder("hash"), Arc::new(FailingIndex), "docs", Duration::from_secs(1));
        assert!(retriever.search("   ", 5).await.is_empty());
        assert!(retriever.search("banking", 0).await.is_empty());
        assert_eq!(retriever.degradation_count(), 0);
    }
}
