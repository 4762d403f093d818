//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates in one step; code that
//! builds a [`Config`] by hand (tests) should call [`Config::validate`].
//!
//! ```toml
//! [db]
//! path = "./data/brief.sqlite"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [index]
//! backend = "qdrant"
//! url = "http://localhost:6333"
//!
//! [context]
//! user_context_url = "http://localhost:8080"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use context_brief_core::budget::DEFAULT_MIN_FRAGMENT_CHARS;
use context_brief_core::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_TOP_N};

/// Group names accepted in `context.group_order`.
pub const GROUP_USER_CONTEXT: &str = "user_context";
pub const GROUP_HISTORY: &str = "history";
pub const GROUP_PASSAGES: &str = "passages";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama`, `hash`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override. Ollama defaults to `http://localhost:11434`,
    /// OpenAI to `https://api.openai.com`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    /// Vector size of the hash fallback when `dims` is unset.
    #[serde(default = "default_fallback_dims")]
    pub fallback_dims: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
            fallback_dims: default_fallback_dims(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_fallback_dims() -> usize {
    384
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Dimension every stored vector must have.
    pub fn effective_dims(&self) -> usize {
        self.dims.unwrap_or(self.fallback_dims)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `sqlite`, `qdrant`, or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            collection: default_collection(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_index_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_retrieval_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Base URL of the multi-block user context service. Unset means
    /// only the legacy store is consulted.
    #[serde(default)]
    pub user_context_url: Option<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_user_context_budget")]
    pub user_context_budget: usize,
    #[serde(default = "default_passages_budget")]
    pub passages_budget: usize,
    #[serde(default = "default_history_budget")]
    pub history_budget: usize,
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,
    #[serde(default = "default_history_top_n")]
    pub history_top_n: usize,
    #[serde(default = "default_group_order")]
    pub group_order: Vec<String>,
    #[serde(default = "default_metadata_cache_size")]
    pub metadata_cache_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            user_context_url: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            deadline_secs: default_deadline_secs(),
            user_context_budget: default_user_context_budget(),
            passages_budget: default_passages_budget(),
            history_budget: default_history_budget(),
            min_fragment_chars: default_min_fragment_chars(),
            history_top_n: default_history_top_n(),
            group_order: default_group_order(),
            metadata_cache_size: default_metadata_cache_size(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_deadline_secs() -> u64 {
    20
}
fn default_user_context_budget() -> usize {
    4000
}
fn default_passages_budget() -> usize {
    5000
}
fn default_history_budget() -> usize {
    1000
}
fn default_min_fragment_chars() -> usize {
    DEFAULT_MIN_FRAGMENT_CHARS
}
fn default_history_top_n() -> usize {
    DEFAULT_HISTORY_TOP_N
}
fn default_group_order() -> Vec<String> {
    vec![
        GROUP_USER_CONTEXT.to_string(),
        GROUP_HISTORY.to_string(),
        GROUP_PASSAGES.to_string(),
    ]
}
fn default_metadata_cache_size() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// A config with every default and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            context: ContextConfig::default(),
            history: HistoryConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "hash" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
                other
            ),
        }
        if self.embedding.effective_dims() == 0 {
            bail!("embedding.fallback_dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        // Validate index
        match self.index.backend.as_str() {
            "sqlite" | "memory" => {}
            "qdrant" => {
                if self.index.url.is_none() {
                    bail!("index.url must be specified when backend is 'qdrant'");
                }
            }
            other => bail!(
                "Unknown index backend: '{}'. Must be sqlite, qdrant, or memory.",
                other
            ),
        }
        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }

        // Validate retrieval
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        // Validate context
        for name in &self.context.group_order {
            match name.as_str() {
                GROUP_USER_CONTEXT | GROUP_HISTORY | GROUP_PASSAGES => {}
                other => bail!(
                    "Unknown context group: '{}'. Must be user_context, history, or passages.",
                    other
                ),
            }
        }
        if self.context.metadata_cache_size == 0 {
            bail!("context.metadata_cache_size must be > 0");
        }
        if self.context.deadline_secs == 0 || self.context.fetch_timeout_secs == 0 {
            bail!("context.deadline_secs and context.fetch_timeout_secs must be > 0");
        }

        if self.history.capacity == 0 {
            bail!("history.capacity must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
