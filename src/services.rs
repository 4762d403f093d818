//! Wiring: one [`Services`] per process, built from [`Config`].
//!
//! The CLI and the HTTP server both go through here so they share one
//! pool, one embedder, one metadata cache, and one set of degradation
//! counters.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::assembler::{AssemblerSettings, ContextAssembler};
use crate::cache::DocumentMetadataCache;
use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::history_store::{ConversationStore, SqliteConversationStore};
use crate::index::{open_index, VectorIndex};
use crate::ingest::Ingestor;
use crate::migrate;
use crate::retriever::Retriever;
use crate::user_context::{
    LegacyContextStore, RemoteUserContextSource, SqliteLegacyContextStore, TieredUserContext,
    UserContextSource,
};

pub struct Services {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub embedder: Arc<Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub cache: Arc<DocumentMetadataCache>,
    pub ingestor: Arc<Ingestor>,
    pub retriever: Arc<Retriever>,
    pub legacy_context: Arc<SqliteLegacyContextStore>,
    pub history: Arc<dyn ConversationStore>,
    pub assembler: Arc<ContextAssembler>,
}

impl Services {
    /// Connect, migrate, and build every component.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Self::with_pool(config, pool)
    }

    pub fn with_pool(config: &Config, pool: SqlitePool) -> Result<Self> {
        let config = Arc::new(config.clone());

        let embedder = Arc::new(Embedder::new(&config.embedding)?);
        let index = open_index(&config.index, &pool)?;
        let cache = Arc::new(DocumentMetadataCache::new(config.context.metadata_cache_size));

        let ingestor = Arc::new(Ingestor::new(
            pool.clone(),
            embedder.clone(),
            index.clone(),
            config.index.collection.clone(),
            config.chunking.clone(),
            cache.clone(),
        ));
        let retriever = Arc::new(Retriever::new(
            embedder.clone(),
            index.clone(),
            config.index.collection.clone(),
            Duration::from_secs(config.retrieval.timeout_secs),
        ));

        let fetch_timeout = Duration::from_secs(config.context.fetch_timeout_secs);
        let primary: Option<Arc<dyn UserContextSource>> = match &config.context.user_context_url {
            Some(url) => Some(Arc::new(
                RemoteUserContextSource::new(url, fetch_timeout)
                    .context("Failed to configure user context service")?,
            )),
            None => None,
        };
        let legacy_context = Arc::new(SqliteLegacyContextStore::new(pool.clone()));
        let legacy: Arc<dyn LegacyContextStore> = legacy_context.clone();
        let tiers = Arc::new(TieredUserContext::new(primary, legacy, fetch_timeout));

        let history: Arc<dyn ConversationStore> = Arc::new(SqliteConversationStore::new(
            pool.clone(),
            config.history.capacity,
        ));

        let assembler = Arc::new(ContextAssembler::new(
            retriever.clone(),
            tiers,
            history.clone(),
            cache.clone(),
            pool.clone(),
            AssemblerSettings::from_config(&config),
        ));

        info!(
            embedding = embedder.model_name(),
            dims = embedder.dims(),
            index = index.backend(),
            collection = %config.index.collection,
            "services ready"
        );

        Ok(Self {
            config,
            pool,
            embedder,
            index,
            cache,
            ingestor,
            retriever,
            legacy_context,
            history,
            assembler,
        })
    }
}
