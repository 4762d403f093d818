//! Qdrant REST [`VectorIndex`].
//!
//! Endpoints used:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | inspect collection | `GET /collections/{name}` |
//! | create collection | `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | search | `POST /collections/{name}/points/search` |
//! | delete by document | `POST /collections/{name}/points/delete?wait=true` |
//!
//! Point ids are the packed `(doc_id, segment_index)` integers, so a
//! re-upsert of the same segment overwrites in place. Collections use
//! cosine distance; the returned score is the similarity.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use context_brief_core::models::{Point, PointPayload, SearchResult};
use context_brief_core::store::{rank_results, VectorIndex};
use context_brief_core::CoreError;

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Collections already verified, with their dimension.
    known: Mutex<HashMap<String, usize>>,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    points: Vec<WirePoint<'a>>,
}

#[derive(Serialize)]
struct WirePoint<'a> {
    id: u64,
    vector: &'a [f32],
    payload: &'a PointPayload,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: PointPayload,
}

#[derive(Deserialize)]
struct CollectionResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
}

impl QdrantIndex {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            known: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn fetch_dims(&self, collection: &str) -> Result<Option<usize>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/collections/{}", collection))
            .send()
            .await
            .with_context(|| format!("Qdrant unreachable at {}", self.base_url))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let info: CollectionResponse = resp
                    .json()
                    .await
                    .context("Invalid Qdrant collection response")?;
                Ok(Some(info.result.config.params.vectors.size))
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                bail!("Qdrant GET collection error {}: {}", s, body)
            }
        }
    }

    async fn create_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let body = serde_json::json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        let resp = self
            .request(reqwest::Method::PUT, &format!("/collections/{}", collection))
            .json(&body)
            .send()
            .await?;
        check_status(resp, "create collection").await
    }
}

async fn check_status(resp: reqwest::Response, op: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("Qdrant {} error {}: {}", op, status, body))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut known = self.known.lock().await;

        let existing = match known.get(collection) {
            Some(&d) => Some(d),
            None => self.fetch_dims(collection).await?,
        };

        match existing {
            Some(existing) if existing != dims => Err(CoreError::DimensionMismatch {
                collection: collection.to_string(),
                existing,
                requested: dims,
            }
            .into()),
            Some(existing) => {
                known.insert(collection.to_string(), existing);
                Ok(())
            }
            None => {
                debug!(collection, dims, "creating Qdrant collection");
                self.create_collection(collection, dims).await?;
                known.insert(collection.to_string(), dims);
                Ok(())
            }
        }
    }

    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<usize> {
        let body = UpsertBody {
            points: points
                .iter()
                .map(|p| WirePoint {
                    id: p.id.as_u64(),
                    vector: &p.vector,
                    payload: &p.payload,
                })
                .collect(),
        };
        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", collection),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Qdrant unreachable at {}", self.base_url))?;
        check_status(resp, "upsert").await?;
        Ok(points.len())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let body = SearchBody {
            vector: query,
            limit: top_k,
            with_payload: true,
        };
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", collection),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Qdrant unreachable at {}", self.base_url))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Qdrant search error {}: {}", status, body);
        }

        let parsed: SearchResponse = resp.json().await.context("Invalid Qdrant search response")?;
        let mut results: Vec<SearchResult> = parsed
            .result
            .into_iter()
            .map(|p| SearchResult::from_payload(p.payload, p.score))
            .collect();
        rank_results(&mut results, top_k);
        Ok(results)
    }

    async fn delete_document(&self, collection: &str, doc_id: u64) -> Result<()> {
        let body = serde_json::json!({
            "filter": {
                "must": [ { "key": "doc_id", "match": { "value": doc_id } } ]
            }
        });
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/delete?wait=true", collection),
            )
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Qdrant unreachable at {}", self.base_url))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(resp, "delete").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_parses_payload() {
        let json = r#"{
            "result": [
                {"id": 3000001, "version": 1, "score": 0.91,
                 "payload": {"doc_id": 3, "segment_index": 1, "text": "liquidity", "provider": "deterministic-fallback"}}
            ],
            "status": "ok",
            "time": 0.001
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.result.len(), 1);
        assert_eq!(parsed.result[0].payload.doc_id, 3);
        assert!(parsed.result[0].payload.provider.is_fallback());
    }

    #[test]
    fn test_collection_response_reads_size() {
        let json = r#"{"result": {"status": "green", "config": {"params": {"vectors": {"size": 768, "distance": "Cosine"}}}}}"#;
        let parsed: CollectionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.result.config.params.vectors.size, 768);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let index = QdrantIndex::new("http://localhost:6333/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(index.url("/collections/x"), "http://localhost:6333/collections/x");
    }
}
