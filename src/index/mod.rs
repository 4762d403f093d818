//! Vector index backends.
//!
//! | `index.backend` | Type |
//! |-----------------|------|
//! | `sqlite` | [`SqliteIndex`]: vectors as BLOBs, brute-force cosine |
//! | `qdrant` | [`QdrantIndex`]: Qdrant REST API |
//! | `memory` | [`InMemoryIndex`]: process-local, lost on exit |

pub mod qdrant;
pub mod sqlite;

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

pub use context_brief_core::store::memory::InMemoryIndex;
pub use context_brief_core::store::{upsert_document_points, SegmentVector, VectorIndex};
pub use qdrant::QdrantIndex;
pub use sqlite::SqliteIndex;

use crate::config::IndexConfig;

/// Build the configured backend. `pool` backs the `sqlite` variant.
pub fn open_index(config: &IndexConfig, pool: &SqlitePool) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteIndex::new(pool.clone()))),
        "memory" => Ok(Arc::new(InMemoryIndex::new())),
        "qdrant" => {
            let url = match &config.url {
                Some(url) => url.clone(),
                None => bail!("index.url must be specified when backend is 'qdrant'"),
            };
            let api_key = std::env::var("QDRANT_API_KEY").ok();
            Ok(Arc::new(QdrantIndex::new(
                &url,
                api_key,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => bail!("Unknown index backend: {}", other),
    }
}
