//! Embedding providers and the fault-tolerant [`Embedder`].
//!
//! Providers:
//! - **[`DisabledProvider`]**: refuses every request; ingestion falls back to hash vectors.
//! - **[`HashProvider`]**: deterministic SHA-256 pseudo-embeddings only, no network.
//! - **[`OpenAIProvider`]**: `POST {url}/v1/embeddings`, key from `OPENAI_API_KEY`.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! [`embed_texts`] is the strict entry point: it either returns one
//! vector of the configured dimension per input or an error.
//! [`Embedder::embed`] never fails. When the provider errors it
//! substitutes [`hash_embedding`] vectors and tags them
//! [`Provenance::DeterministicFallback`].
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub use context_brief_core::embedding::{
    blob_to_vec, cosine_similarity, hash_embedding, vec_to_blob, EmbeddingProvider,
};
use context_brief_core::models::Provenance;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Embed a batch of texts with the configured provider.
///
/// Dispatches on `config.provider`. The response is checked against the
/// request: a vector count or dimension that does not match is an error,
/// never a partial result.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await?,
        "ollama" => embed_ollama(config, texts).await?,
        "hash" => {
            let dims = config.effective_dims();
            texts.iter().map(|t| hash_embedding(t, dims)).collect()
        }
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    check_shape(&vectors, texts.len(), config.effective_dims())?;
    Ok(vectors)
}

fn check_shape(vectors: &[Vec<f32>], expected_count: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_count {
        bail!(
            "Embedding response has {} vectors for {} inputs",
            vectors.len(),
            expected_count
        );
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
        bail!(
            "Embedding {} has dimension {}, expected {}",
            i,
            v.len(),
            dims
        );
    }
    if let Some(i) = vectors
        .iter()
        .position(|v| v.iter().any(|x| !x.is_finite()))
    {
        bail!("Embedding {} has a non-finite component", i);
    }
    Ok(())
}

// ============ Disabled Provider ============

/// A no-op provider. Every request fails.
pub struct DisabledProvider {
    dims: usize,
}

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn provenance(&self) -> Provenance {
        Provenance::DeterministicFallback
    }
}

// ============ Hash Provider ============

/// Deterministic pseudo-embeddings with no semantic signal.
///
/// Useful for tests and air-gapped setups. Vectors are tagged as
/// fallback because no model produced them.
pub struct HashProvider {
    dims: usize,
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "sha256-hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn provenance(&self) -> Provenance {
        Provenance::DeterministicFallback
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Reads `OPENAI_API_KEY` on every request. Without it each batch
/// falls back to hash vectors.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            warn!("OPENAI_API_KEY not set; embeddings will use the deterministic fallback");
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_with_retry(
        config,
        "OpenAI",
        &format!("{}/v1/embeddings", base.trim_end_matches('/')),
        Some(&api_key),
        &body,
    )
    .await?;
    parse_openai_response(&json)
}

/// Extract `data[].embedding`, reordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, parse_vector(embedding)?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_with_retry(
        config,
        "Ollama",
        &format!("{}/api/embed", base.trim_end_matches('/')),
        None,
        &body,
    )
    .await?;
    parse_ollama_response(&json)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding
                .as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))?;
            parse_vector(values)
        })
        .collect()
}

fn parse_vector(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            let f = v
                .as_f64()
                .ok_or_else(|| anyhow!("Invalid embedding response: non-numeric component"))?
                as f32;
            if !f.is_finite() {
                bail!("Invalid embedding response: component out of f32 range");
            }
            Ok(f)
        })
        .collect()
}

/// POST a JSON body, retrying 429/5xx and network errors with backoff.
async fn post_with_retry(
    config: &EmbeddingConfig,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429), no retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error at {}: {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let dims = config.effective_dims();
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider { dims })),
        "hash" => Ok(Box::new(HashProvider { dims })),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Vectors for a batch of texts with the provenance of each.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub provenance: Vec<Provenance>,
}

impl EmbeddingBatch {
    /// `DeterministicFallback` if any vector is a fallback.
    pub fn overall_provenance(&self) -> Provenance {
        if self.provenance.iter().any(Provenance::is_fallback) {
            Provenance::DeterministicFallback
        } else {
            Provenance::Real
        }
    }

    pub fn fallback_count(&self) -> usize {
        self.provenance.iter().filter(|p| p.is_fallback()).count()
    }
}

/// Provider plus config, with fallback for the write path.
pub struct Embedder {
    config: EmbeddingConfig,
    provider: Box<dyn EmbeddingProvider>,
    fallbacks: AtomicU64,
}

impl Embedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            provider: create_provider(config)?,
            config: config.clone(),
            fallbacks: AtomicU64::new(0),
        })
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Number of texts embedded by fallback since startup.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Embed texts in `batch_size` batches. Never fails.
    ///
    /// A batch the provider cannot serve is embedded with
    /// [`hash_embedding`] instead and tagged as fallback.
    pub async fn embed(&self, texts: &[String]) -> EmbeddingBatch {
        let dims = self.dims();
        let mut vectors = Vec::with_capacity(texts.len());
        let mut provenance = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            match embed_texts(&self.config, batch).await {
                Ok(batch_vectors) => {
                    vectors.extend(batch_vectors);
                    provenance.extend(std::iter::repeat(self.provider.provenance()).take(batch.len()));
                }
                Err(e) => {
                    let total = self.fallbacks.fetch_add(batch.len() as u64, Ordering::Relaxed)
                        + batch.len() as u64;
                    warn!(
                        provider = %self.config.provider,
                        texts = batch.len(),
                        fallback_total = total,
                        error = %e,
                        "embedding provider unavailable, using deterministic fallback"
                    );
                    vectors.extend(batch.iter().map(|t| hash_embedding(t, dims)));
                    provenance.extend(std::iter::repeat(Provenance::DeterministicFallback).take(batch.len()));
                }
            }
        }

        EmbeddingBatch {
            vectors,
            provenance,
        }
    }

    /// Embed one query. Fails if the provider does.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        embed_texts(&self.config, &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(dims),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_openai_response(&serde_json::json!({"data": "nope"})).is_err());
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [[1.0, "x"]]})).is_err());
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_check_shape() {
        assert!(check_shape(&[vec![1.0, 2.0]], 1, 2).is_ok());
        assert!(check_shape(&[vec![1.0, 2.0]], 2, 2).is_err());
        assert!(check_shape(&[vec![1.0]], 1, 2).is_err());
        assert!(check_shape(&[vec![f32::NAN, 1.0]], 1, 2).is_err());
        assert!(check_shape(&[vec![f32::INFINITY, 1.0]], 1, 2).is_err());
    }

    #[test]
    fn test_parse_rejects_values_beyond_f32_range() {
        let json = serde_json::json!({"embeddings": [[1e39, 1.0]]});
        assert!(parse_ollama_response(&json).is_err());
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [-1e39, 0.5]}]});
        assert!(parse_openai_response(&json).is_err());
        let ok = serde_json::json!({"embeddings": [[3.0e38, -0.25]]});
        assert_eq!(parse_ollama_response(&ok).unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_openai_without_key_falls_back_per_batch() {
        std::env::remove_var("OPENAI_API_KEY");
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(8),
            url: Some("http://127.0.0.1:1".to_string()),
            max_retries: 0,
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::new(&config).unwrap();
        let batch = embedder.embed(&["rate outlook".to_string()]).await;
        assert_eq!(batch.provenance, vec![Provenance::DeterministicFallback]);
        assert_eq!(batch.vectors[0], hash_embedding("rate outlook", 8));
        assert!(embedder.embed_query("rate outlook").await.is_err());
    }

    #[test]
    fn test_create_provider_variants() {
        assert_eq!(create_provider(&hash_config(8)).unwrap().dims(), 8);
        let disabled = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        };
        assert_eq!(create_provider(&disabled).unwrap().model_name(), "disabled");
        let unknown = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&unknown).is_err());
    }

    #[tokio::test]
    async fn test_hash_provider_is_deterministic() {
        let embedder = Embedder::new(&hash_config(16)).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let a = embedder.embed(&texts).await;
        let b = embedder.embed(&texts).await;
        assert_eq!(a, b);
        assert_eq!(a.vectors.len(), 2);
        assert!(a.vectors.iter().all(|v| v.len() == 16));
        assert_eq!(embedder.fallback_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_provider_falls_back_and_counts() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            fallback_dims: 12,
            batch_size: 2,
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::new(&config).unwrap();
        let texts: Vec<String> = (0..5).map(|i| format!("segment {}", i)).collect();
        let batch = embedder.embed(&texts).await;
        assert_eq!(batch.vectors.len(), 5);
        assert_eq!(batch.fallback_count(), 5);
        assert_eq!(batch.overall_provenance(), Provenance::DeterministicFallback);
        assert_eq!(batch.vectors[3], hash_embedding("segment 3", 12));
        assert_eq!(embedder.fallback_count(), 5);
        assert!(embedder.embed_query("anything").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_ollama_falls_back() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(8),
            url: Some("http://127.0.0.1:1".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::new(&config).unwrap();
        let batch = embedder.embed(&["quarterly outlook".to_string()]).await;
        assert_eq!(batch.provenance, vec![Provenance::DeterministicFallback]);
        assert_eq!(batch.vectors[0].len(), 8);
    }
}
