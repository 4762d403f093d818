//! End-to-end tests of ingestion, retrieval, and assembly against real
//! SQLite files and small axum servers standing in for upstreams.

use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;

use context_brief::config::Config;
use context_brief::documents;
use context_brief::index::SqliteIndex;
use context_brief::services::Services;
use context_brief_core::models::{ContextKind, ConversationRecord, Document, IndexStatus, Provenance};

// ─── Helpers ────────────────────────────────────────────────────────

fn config_from(tmp: &TempDir, extra: &str) -> Config {
    let content = format!(
        r#"
[db]
path = "{}/brief.sqlite"

[chunking]
chunk_size = 1000
overlap = 200

{}
"#,
        tmp.path().display(),
        extra
    );
    let cfg: Config = toml::from_str(&content).unwrap();
    cfg.validate().unwrap();
    cfg
}

fn hash_config(tmp: &TempDir) -> Config {
    config_from(
        tmp,
        r#"
[embedding]
provider = "hash"
dims = 32
"#,
    )
}

/// Serve `app` on an ephemeral port and return its base URL.
async fn spawn_upstream(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

fn letters(n: usize) -> String {
    (0..n).map(|i| (b'a' + (i % 26) as u8) as char).collect()
}

fn document(doc_id: u64, name: &str, text: &str) -> Document {
    Document {
        doc_id,
        name: name.to_string(),
        text: text.to_string(),
        created_at: Utc::now(),
        page_count: 4,
    }
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_2500_chars_yields_three_overlapping_chunks() {
    let tmp = TempDir::new().unwrap();
    let services = Services::open(&hash_config(&tmp)).await.unwrap();

    let text = letters(2500);
    let report = services
        .ingestor
        .ingest_document(&document(12, "annual-report.pdf", &text))
        .await
        .unwrap();

    assert_eq!(report.segments, 3);
    assert_eq!(report.upserted, 3);
    // hash embeddings are the deterministic fallback
    assert_eq!(report.status, IndexStatus::Degraded);
    assert_eq!(report.fallback_segments, 3);

    let payloads = SqliteIndex::new(services.pool.clone())
        .document_payloads("documents", 12)
        .await
        .unwrap();
    assert_eq!(payloads.len(), 3);
    for pair in payloads.windows(2) {
        let prev: Vec<char> = pair[0].text.chars().collect();
        let next: Vec<char> = pair[1].text.chars().collect();
        assert_eq!(&prev[prev.len() - 200..], &next[..200]);
    }
    assert!(payloads
        .iter()
        .all(|p| p.provider == Provenance::DeterministicFallback));

    let meta = documents::get_metadata(&services.pool, 12)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.index_status, IndexStatus::Degraded);
}

#[tokio::test]
async fn test_reingest_replaces_all_points() {
    let tmp = TempDir::new().unwrap();
    let services = Services::open(&hash_config(&tmp)).await.unwrap();

    services
        .ingestor
        .ingest_document(&document(3, "memo.txt", &letters(2500)))
        .await
        .unwrap();
    services
        .ingestor
        .ingest_document(&document(3, "memo.txt", "A much shorter revision."))
        .await
        .unwrap();

    let payloads = SqliteIndex::new(services.pool.clone())
        .document_payloads("documents", 3)
        .await
        .unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].text, "A much shorter revision.");
}

#[tokio::test]
async fn test_empty_document_rejected_before_any_write() {
    let tmp = TempDir::new().unwrap();
    let services = Services::open(&hash_config(&tmp)).await.unwrap();

    let err = services
        .ingestor
        .ingest_document(&document(5, "blank.pdf", "   \n "))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("5"));
    assert!(documents::get_metadata(&services.pool, 5)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_delete_cascades_to_every_point() {
    let tmp = TempDir::new().unwrap();
    let services = Services::open(&hash_config(&tmp)).await.unwrap();

    services
        .ingestor
        .ingest_document(&document(8, "policy.pdf", &letters(2500)))
        .await
        .unwrap();
    services
        .ingestor
        .ingest_document(&document(9, "other.pdf", "Unrelated text that stays."))
        .await
        .unwrap();

    assert!(services.ingestor.delete_document(8).await.unwrap());
    assert!(!services.ingestor.delete_document(8).await.unwrap());

    let index = SqliteIndex::new(services.pool.clone());
    assert!(index.document_payloads("documents", 8).await.unwrap().is_empty());
    assert_eq!(index.document_payloads("documents", 9).await.unwrap().len(), 1);

    let results = services.retriever.search(&letters(300), 10).await;
    assert!(results.iter().all(|r| r.doc_id != 8));
}

#[tokio::test]
async fn test_search_ranks_exact_passage_first() {
    let tmp = TempDir::new().unwrap();
    let services = Services::open(&hash_config(&tmp)).await.unwrap();

    services
        .ingestor
        .ingest_document(&document(1, "a.pdf", "Credit exposure to commercial real estate."))
        .await
        .unwrap();
    services
        .ingestor
        .ingest_document(&document(2, "b.pdf", "Quarterly retail footfall statistics."))
        .await
        .unwrap();

    let results = services
        .retriever
        .search("Quarterly retail footfall statistics.", 2)
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].doc_id, 2);
    assert!(results[0].score >= results[1].score);
}

// ─── Degradation with fake upstreams ────────────────────────────────

#[tokio::test]
async fn test_embedding_outage_falls_back_and_tags_points() {
    let ollama = spawn_upstream(Router::new().route(
        "/api/embed",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
    ))
    .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        &format!(
            r#"
[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 32
url = "{}"
max_retries = 0
"#,
            ollama
        ),
    );
    let services = Services::open(&cfg).await.unwrap();

    let report = services
        .ingestor
        .ingest_document(&document(4, "outage.pdf", "Text embedded during an outage."))
        .await
        .unwrap();

    assert_eq!(report.status, IndexStatus::Degraded);
    assert_eq!(report.upserted, 1);
    assert!(services.embedder.fallback_count() >= 1);

    let payloads = SqliteIndex::new(services.pool.clone())
        .document_payloads("documents", 4)
        .await
        .unwrap();
    assert_eq!(payloads[0].provider, Provenance::DeterministicFallback);

    // query embedding is strict, so retrieval degrades to empty
    assert!(services.retriever.search("outage", 5).await.is_empty());
    assert_eq!(services.retriever.degradation_count(), 1);
}

#[tokio::test]
async fn test_real_embeddings_mark_document_indexed() {
    let ollama = spawn_upstream(Router::new().route(
        "/api/embed",
        post(|Json(body): Json<Value>| async move {
            let n = body["input"].as_array().map(|a| a.len()).unwrap_or(1);
            let vectors: Vec<Vec<f32>> = (0..n).map(|i| vec![1.0, i as f32 + 1.0, 0.5, 0.25]).collect();
            Json(json!({ "embeddings": vectors }))
        }),
    ))
    .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        &format!(
            r#"
[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 4
url = "{}"
"#,
            ollama
        ),
    );
    let services = Services::open(&cfg).await.unwrap();

    let report = services
        .ingestor
        .ingest_document(&document(6, "ok.pdf", &letters(1500)))
        .await
        .unwrap();
    assert_eq!(report.status, IndexStatus::Indexed);
    assert_eq!(report.fallback_segments, 0);

    let payloads = SqliteIndex::new(services.pool.clone())
        .document_payloads("documents", 6)
        .await
        .unwrap();
    assert!(payloads.iter().all(|p| p.provider == Provenance::Real));
}

#[tokio::test]
async fn test_overflowing_embedding_values_fall_back() {
    let ollama = spawn_upstream(Router::new().route(
        "/api/embed",
        post(|Json(body): Json<Value>| async move {
            let n = body["input"].as_array().map(|a| a.len()).unwrap_or(1);
            let vectors: Vec<Value> = (0..n).map(|_| json!([1e39, 1.0, 0.5, 0.25])).collect();
            Json(json!({ "embeddings": vectors }))
        }),
    ))
    .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        &format!(
            r#"
[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 4
url = "{}"
max_retries = 0
"#,
            ollama
        ),
    );
    let services = Services::open(&cfg).await.unwrap();

    let report = services
        .ingestor
        .ingest_document(&document(7, "overflow.pdf", "Vectors from a misbehaving model."))
        .await
        .unwrap();
    assert_eq!(report.status, IndexStatus::Degraded);
    assert_eq!(report.fallback_segments, 1);

    let payloads = SqliteIndex::new(services.pool.clone())
        .document_payloads("documents", 7)
        .await
        .unwrap();
    assert_eq!(payloads[0].provider, Provenance::DeterministicFallback);

    assert!(services.retriever.search("misbehaving model", 5).await.is_empty());
    assert_eq!(services.retriever.degradation_count(), 1);
}

#[tokio::test]
async fn test_vector_store_errors_yield_empty_retrieval() {
    let qdrant = spawn_upstream(
        Router::new()
            .route(
                "/collections/documents/points/search",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
            )
            .route(
                "/collections/malformed/points/search",
                post(|| async { Json(json!({ "result": "not a list" })) }),
            ),
    )
    .await;

    for collection in ["documents", "malformed"] {
        let tmp = TempDir::new().unwrap();
        let cfg = config_from(
            &tmp,
            &format!(
                r#"
[embedding]
provider = "hash"
dims = 32

[index]
backend = "qdrant"
url = "{}"
collection = "{}"
"#,
                qdrant, collection
            ),
        );
        let services = Services::open(&cfg).await.unwrap();

        let results = services.retriever.search("banking risk", 5).await;
        assert!(results.is_empty(), "collection {}", collection);
        assert_eq!(services.retriever.degradation_count(), 1);
    }
}

#[tokio::test]
async fn test_vector_store_write_failure_marks_document_failed() {
    let qdrant = spawn_upstream(Router::new().route(
        "/collections/documents",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk full") }),
    ))
    .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        &format!(
            r#"
[embedding]
provider = "hash"
dims = 32

[index]
backend = "qdrant"
url = "{}"
"#,
            qdrant
        ),
    );
    let services = Services::open(&cfg).await.unwrap();

    let report = services
        .ingestor
        .ingest_document(&document(21, "unlucky.pdf", "Never reaches the index."))
        .await
        .unwrap();
    assert_eq!(report.status, IndexStatus::Failed);
    assert!(report.error.is_some());

    let failed = documents::list_documents(&services.pool, Some(IndexStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].doc_id, 21);
}

// ─── Context assembly ───────────────────────────────────────────────

#[tokio::test]
async fn test_primary_context_timeout_falls_back_to_legacy() {
    let slow = spawn_upstream(Router::new().route(
        "/users/{owner}/contexts",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "contexts": [] }))
        }),
    ))
    .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        &format!(
            r#"
[embedding]
provider = "hash"
dims = 32

[context]
user_context_url = "{}"
fetch_timeout_secs = 1
"#,
            slow
        ),
    );
    let services = Services::open(&cfg).await.unwrap();
    services
        .legacy_context
        .save("analyst-7", ContextKind::Text, "Covers Nordic banks.")
        .await
        .unwrap();

    let ctx = services.assembler.assemble("analyst-7", "banking risk").await;

    assert!(ctx.text.contains("Covers Nordic banks."));
    assert!(ctx
        .degraded_sources
        .contains(&"user_context:primary".to_string()));

    // no legacy slot either: empty group, still no error
    let ctx = services.assembler.assemble("stranger", "banking risk").await;
    assert!(!ctx.text.contains("=== USER CONTEXT ==="));
}

#[tokio::test]
async fn test_primary_context_blocks_are_used_in_order() {
    let primary = spawn_upstream(Router::new().route(
        "/users/{owner}/contexts",
        get(|| async {
            Json(json!({ "contexts": [
                { "name": "role", "kind": "text", "content": "Risk officer." },
                { "name": "portfolio", "kind": "document", "content": "Mortgage book summary." }
            ]}))
        }),
    ))
    .await;

    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        &format!(
            r#"
[embedding]
provider = "hash"
dims = 32

[context]
user_context_url = "{}/"
"#,
            primary
        ),
    );
    let services = Services::open(&cfg).await.unwrap();
    services
        .ingestor
        .ingest_document(&document(30, "stress-test.pdf", "Mortgage stress test results."))
        .await
        .unwrap();
    services
        .history
        .append(&ConversationRecord {
            owner_id: "officer".to_string(),
            query: "mortgage stress scenarios".to_string(),
            response_summary: "Discussed rate shocks.".to_string(),
            kind: "chat".to_string(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    let ctx = services.assembler.assemble("officer", "mortgage stress").await;

    assert!(ctx.degraded_sources.is_empty(), "{:?}", ctx.degraded_sources);
    let role = ctx.text.find("--- role ---").unwrap();
    let portfolio = ctx.text.find("--- portfolio ---").unwrap();
    assert!(role < portfolio);
    assert!(ctx.text.contains("chat: mortgage stress scenarios"));
    assert!(ctx.text.contains("--- stress-test.pdf #0 ---"));
    assert_eq!(ctx.groups.len(), 3);
}

#[tokio::test]
async fn test_assembled_text_respects_group_budgets() {
    let tmp = TempDir::new().unwrap();
    let cfg = config_from(
        &tmp,
        r#"
[embedding]
provider = "hash"
dims = 32

[context]
user_context_budget = 300
passages_budget = 500
history_budget = 100
min_fragment_chars = 50
"#,
    );
    let services = Services::open(&cfg).await.unwrap();
    services
        .legacy_context
        .save("u", ContextKind::Text, &letters(1000))
        .await
        .unwrap();
    for id in 1..=3 {
        services
            .ingestor
            .ingest_document(&document(id, &format!("doc-{}.pdf", id), &letters(900)))
            .await
            .unwrap();
    }

    let ctx = services.assembler.assemble("u", "abc").await;

    let user = ctx.groups.iter().find(|g| g.name == "user_context").unwrap();
    assert!(user.truncated);
    assert_eq!(user.used_chars, 300);
    let passages = ctx.groups.iter().find(|g| g.name == "passages").unwrap();
    assert!(passages.used_chars <= 500);
    assert!(ctx.text.contains("..."));
}
