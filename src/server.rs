//! HTTP API.
//!
//! A thin JSON layer over [`SyncEngine`]. Every handler delegates to one
//! engine operation and maps [`SyncError`] to a status code through its
//! [`ErrorKind`].
//!
//! # Endpoints
//!
//! | Method   | Path                | Description |
//! |----------|---------------------|-------------|
//! | `GET`    | `/health`           | Readiness, counts, uptime |
//! | `POST`   | `/search`           | Similarity search |
//! | `GET`    | `/documents`        | Every known document |
//! | `DELETE` | `/documents/{*path}`| Delete a document from disk, index and ledger |
//! | `POST`   | `/process`          | Run a reconciliation pass |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_ready` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::engine::{DeletedDocument, DocumentSummary, SyncEngine};
use crate::error::{ErrorKind, SyncError};
use crate::reconcile::ReconcileReport;

const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 50;

type AppState = Arc<SyncEngine>;

/// Build the router. Exposed separately from [`serve`] so tests can drive
/// it on an ephemeral port.
pub fn router(engine: Arc<SyncEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{*path}", delete(handle_delete_document))
        .route("/process", post(handle_process))
        .layer(cors)
        .with_state(engine)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    engine: Arc<SyncEngine>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Bind `[server].bind` and serve until `shutdown` resolves.
pub async fn run_server(
    engine: Arc<SyncEngine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    serve(engine, listener, shutdown).await
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

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match (&err, err.kind()) {
            (SyncError::NotReady, _) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "not_ready".to_string(),
                message,
            },
            (SyncError::OutsideRoot(_), _) => bad_request(message),
            (_, ErrorKind::NotFound) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found".to_string(),
                message,
            },
            _ => {
                error!(error = %err, kind = ?err.kind(), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message,
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the index cannot be read.
    status: String,
    version: String,
    ready: bool,
    known_files: usize,
    indexed_chunks: usize,
    last_processed: Option<String>,
    uptime_seconds: u64,
    services_running: Vec<&'static str>,
    storage_used_mb: f64,
}

async fn handle_health(State(engine): State<AppState>) -> Json<HealthResponse> {
    let (status, indexed_chunks) = match engine.index_stats().await {
        Ok(stats) => ("ok", stats.chunks),
        Err(e) => {
            error!(error = %e, "health check could not read index");
            ("degraded", 0)
        }
    };
    let mut services_running = engine.services_running().await;
    services_running.push("http_api");
    let storage_used_mb = match engine.storage_used_bytes().await {
        Ok(bytes) => (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
        Err(e) => {
            warn!(error = %e, "could not measure storage");
            0.0
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ready: engine.is_ready(),
        known_files: engine.get_known_file_count().await,
        indexed_chunks,
        last_processed: engine.get_last_processed_time().await.map(|t| t.to_rfc3339()),
        uptime_seconds: engine.uptime_seconds(),
        services_running,
        storage_used_mb,
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResult {
    content: String,
    source: String,
    chunk_index: usize,
    total_chunks: usize,
    score: f32,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
    total_found: usize,
    query_time_ms: u64,
}

async fn handle_search(
    State(engine): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = req
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let started = Instant::now();
    let hits = engine.search(query, limit).await?;
    let results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| SearchResult {
            content: hit.content,
            source: hit.metadata.source,
            chunk_index: hit.metadata.chunk_index,
            total_chunks: hit.metadata.total_chunks,
            score: hit.score,
        })
        .collect();

    Ok(Json(SearchResponse {
        total_found: results.len(),
        results,
        query_time_ms: started.elapsed().as_millis() as u64,
    }))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    total_documents: usize,
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(
    State(engine): State<AppState>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let documents = engine.known_files().await?;
    Ok(Json(DocumentsResponse {
        total_documents: documents.len(),
        documents,
    }))
}

async fn handle_delete_document(
    State(engine): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<DeletedDocument>, AppError> {
    Ok(Json(engine.delete_document(&path).await?))
}

// ============ POST /process ============

async fn handle_process(
    State(engine): State<AppState>,
) -> Result<Json<ReconcileReport>, AppError> {
    Ok(Json(engine.trigger_reconciliation().await?))
}
