//! JSON HTTP API over the ingestion and context pipeline.
//!
//! # Endpoints
//!
//! | Method   | Path                         | Description |
//! |----------|------------------------------|-------------|
//! | `GET`    | `/health`                    | Version and degradation counters |
//! | `POST`   | `/index`                     | Embed and store pre-split segments |
//! | `POST`   | `/documents`                 | Chunk, embed, and store a whole document |
//! | `GET`    | `/documents`                 | List documents, optionally `?status=failed` |
//! | `DELETE` | `/documents/{doc_id}`        | Delete a document and its points |
//! | `POST`   | `/search`                    | Semantic search over passages |
//! | `POST`   | `/context`                   | Assemble a budgeted context string |
//! | `POST`   | `/conversations`             | Append a conversation record |
//! | `PUT`    | `/users/{owner_id}/context`  | Replace the legacy user context slot |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500). `/search` and `/context` never fail on upstream
//! outages; they return empty or partial results instead.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use context_brief_core::models::{IndexStatus, SearchResult};
use context_brief_core::CoreError;

use crate::config::Config;
use crate::documents::{self, DocumentMetadata};
use crate::ingest::IngestReport;
use crate::models::{
    AssembledContext, ContextRequest, ConversationAppend, IndexRequest, IndexResponse,
    IngestRequest, SearchRequest, SetContextRequest,
};
use crate::services::Services;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Build the services from `config` and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Arc::new(Services::open(config).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Context server listening on http://{}", bind_addr);

    axum::serve(listener, router(services)).await?;
    Ok(())
}

/// The application router, exposed for tests and embedding.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/index", post(handle_index))
        .route("/documents", post(handle_ingest).get(handle_list_documents))
        .route("/documents/{doc_id}", delete(handle_delete_document))
        .route("/search", post(handle_search))
        .route("/context", post(handle_context))
        .route("/conversations", post(handle_append_conversation))
        .route("/users/{owner_id}/context", put(handle_set_context))
        .layer(cors)
        .with_state(AppState { services })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map pipeline errors to a status. Typed core errors are the caller's
/// fault except a dimension clash, which is a conflict with stored state.
fn classify(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    match err.chain().find_map(|e| e.downcast_ref::<CoreError>()) {
        Some(CoreError::DimensionMismatch { .. }) => AppError {
            status: StatusCode::CONFLICT,
            code: "conflict".to_string(),
            message,
        },
        Some(_) => bad_request(message),
        None => {
            error!(error = %message, "request failed");
            internal(message)
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    embedding_model: String,
    index_backend: String,
    embedding_fallbacks: u64,
    retrieval_degradations: u64,
    metadata_cache_hits: u64,
    metadata_cache_misses: u64,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let s = &state.services;
    let (hits, misses) = s.cache.stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embedding_model: s.embedder.model_name().to_string(),
        index_backend: s.index.backend().to_string(),
        embedding_fallbacks: s.embedder.fallback_count(),
        retrieval_degradations: s.retriever.degradation_count(),
        metadata_cache_hits: hits,
        metadata_cache_misses: misses,
    })
}

// ============ Documents ============

async fn handle_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    req.validate().map_err(|e| bad_request(format!("{:#}", e)))?;
    let resp = state
        .services
        .ingestor
        .index_segments(&req)
        .await
        .map_err(classify)?;
    Ok(Json(resp))
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    req.validate().map_err(|e| bad_request(format!("{:#}", e)))?;
    let report = state
        .services
        .ingestor
        .ingest_document(&req.into_document())
        .await
        .map_err(classify)?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<String>,
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentMetadata>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentList>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<IndexStatus>)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;
    let documents = documents::list_documents(&state.services.pool, status)
        .await
        .map_err(classify)?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(doc_id): Path<u64>,
) -> Result<StatusCode, AppError> {
    let existed = state
        .services
        .ingestor
        .delete_document(doc_id)
        .await
        .map_err(classify)?;
    if !existed {
        return Err(not_found(format!("document not found: {}", doc_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Retrieval ============

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let top_k = req.top_k.unwrap_or(state.services.config.retrieval.top_k);
    Ok(Json(state.services.retriever.search(&req.query, top_k).await))
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<AssembledContext>, AppError> {
    if req.owner_id.trim().is_empty() {
        return Err(bad_request("owner_id must not be empty"));
    }
    Ok(Json(
        state
            .services
            .assembler
            .assemble(&req.owner_id, &req.query)
            .await,
    ))
}

// ============ Owner state ============

async fn handle_append_conversation(
    State(state): State<AppState>,
    Json(req): Json<ConversationAppend>,
) -> Result<StatusCode, AppError> {
    req.validate().map_err(|e| bad_request(format!("{:#}", e)))?;
    state
        .services
        .history
        .append(&req.into_record())
        .await
        .map_err(classify)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_set_context(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(req): Json<SetContextRequest>,
) -> Result<StatusCode, AppError> {
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    state
        .services
        .legacy_context
        .save(&owner_id, req.kind, &req.content)
        .await
        .map_err(classify)?;
    Ok(StatusCode::NO_CONTENT)
}
