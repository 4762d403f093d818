//! In-memory [`VectorIndex`] implementation for tests and embedded use.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Points keep
//! insertion order so that equal scores come back in the order they were
//! written. Search is brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::CoreError;
use crate::models::{Point, SearchResult};

use super::{rank_results, VectorIndex};

struct Collection {
    dims: usize,
    points: Vec<Point>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_dims(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .ok()?
            .get(collection)
            .map(|c| c.dims)
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .ok()
            .and_then(|guard| guard.get(collection).map(|c| c.points.len()))
            .unwrap_or(0)
    }

    /// Snapshot of the stored points of a collection, in store order.
    pub fn points(&self, collection: &str) -> Vec<Point> {
        self.collections
            .read()
            .ok()
            .and_then(|guard| guard.get(collection).map(|c| c.points.clone()))
            .unwrap_or_default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        match guard.get(collection) {
            Some(existing) if existing.dims != dims => Err(CoreError::DimensionMismatch {
                collection: collection.to_string(),
                existing: existing.dims,
                requested: dims,
            }
            .into()),
            Some(_) => Ok(()),
            None => {
                guard.insert(
                    collection.to_string(),
                    Collection {
                        dims,
                        points: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<usize> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        let coll = guard
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection not found: {}", collection))?;

        for p in points {
            if p.vector.len() != coll.dims {
                return Err(CoreError::DimensionMismatch {
                    collection: collection.to_string(),
                    existing: coll.dims,
                    requested: p.vector.len(),
                }
                .into());
            }
        }

        for p in points {
            match coll.points.iter_mut().find(|existing| existing.id == p.id) {
                Some(existing) => *existing = p.clone(),
                None => coll.points.push(p.clone()),
            }
        }
        Ok(points.len())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let guard = self.collections.read().map_err(|_| poisoned())?;
        let coll = match guard.get(collection) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        let mut results: Vec<SearchResult> = coll
            .points
            .iter()
            .map(|p| SearchResult::from_payload(p.payload.clone(), cosine_similarity(query, &p.vector)))
            .collect();
        rank_results(&mut results, top_k);
        Ok(results)
    }

    async fn delete_document(&self, collection: &str, doc_id: u64) -> Result<()> {
        let mut guard = self.collections.write().map_err(|_| poisoned())?;
        if let Some(coll) = guard.get_mut(collection) {
            coll.points.retain(|p| p.payload.doc_id != doc_id);
        }
        Ok(())
    }
}
