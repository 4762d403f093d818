//! Size-bounded document metadata cache.
//!
//! The assembler labels passages with their document's name. Looking
//! that up per passage would hit SQLite on every request, so an owned LRU
//! sits in front of it. Misses are not cached, so a document ingested
//! after a failed lookup is picked up on the next request.

use anyhow::Result;
use lru::LruCache;
use sqlx::SqlitePool;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::documents::{self, DocumentMetadata};

pub struct DocumentMetadataCache {
    entries: Mutex<LruCache<u64, DocumentMetadata>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DocumentMetadataCache {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<u64, DocumentMetadata>> {
        // a panic mid-update leaves the LRU consistent, so poisoning is ignored
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, doc_id: u64) -> Option<DocumentMetadata> {
        let found = self.lock().get(&doc_id).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, meta: DocumentMetadata) {
        self.lock().put(meta.doc_id, meta);
    }

    pub fn invalidate(&self, doc_id: u64) {
        self.lock().pop(&doc_id);
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation or the last [`clear`](Self::clear).
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Cached metadata, loading from the database on a miss.
    pub async fn resolve(&self, pool: &SqlitePool, doc_id: u64) -> Result<Option<DocumentMetadata>> {
        if let Some(meta) = self.get(doc_id) {
            return Ok(Some(meta));
        }
        let loaded = documents::get_metadata(pool, doc_id).await?;
        if let Some(meta) = &loaded {
            self.insert(meta.clone());
        }
        Ok(loaded)
    }
}
