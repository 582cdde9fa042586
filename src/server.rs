//! JSON HTTP API over [`TutorService`].
//!
//! A thin web layer: authentication is out of scope, so the caller's owner
//! id is taken verbatim from the `x-owner-id` header.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/courses/{course}/documents` | Ingest a base64-encoded file |
//! | `GET` | `/courses/{course}/documents` | List documents |
//! | `GET` | `/courses/{course}/documents/count` | Count documents |
//! | `DELETE` | `/courses/{course}/documents/{name}` | Delete a document |
//! | `GET` | `/courses/{course}/documents/{name}/url` | Presigned download URL |
//! | `POST` | `/courses/{course}/answer` | Ask the tutor |
//! | `GET` | `/blobs/{*path}` | Redeem a presigned URL |
//! | `GET` | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unsupported_type", "message": "unsupported source type: pptx" } }
//! ```
//!
//! `unsupported_type` (415), `decode_failed` (422), `transient_unavailable`
//! (503), `permanent_internal_error` (500), `bad_request` (400),
//! `not_found` (404), `forbidden` (403).

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::blob::{BlobStore, LocalBlobStore};
use crate::config::Config;
use crate::error::{BlobError, Error, ErrorKind};
use crate::ingest::IngestOutcome;
use crate::models::{AnswerResult, DocumentInfo, Scope, Turn};
use crate::service::{local_blob_store, DeleteOutcome, TutorService};

const OWNER_HEADER: &str = "x-owner-id";

#[derive(Clone)]
struct AppState {
    service: Arc<TutorService>,
    blobs: Arc<LocalBlobStore>,
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let blobs = Arc::new(local_blob_store(config)?);
    let service = TutorService::open(config, blobs.clone()).await?;
    let state = AppState {
        service: Arc::new(service),
        blobs,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "tutor server listening");
    println!("Tutor server listening on http://{}", config.server.bind);

    axum::serve(listener, router(state, config.server.max_upload_bytes)).await?;
    Ok(())
}

/// Request bodies over `max_upload_bytes` are rejected with 413.
fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/courses/{course}/documents",
            post(handle_ingest).get(handle_list),
        )
        .route("/courses/{course}/documents/count", get(handle_count))
        .route("/courses/{course}/documents/{name}", delete(handle_delete))
        .route("/courses/{course}/documents/{name}/url", get(handle_url))
        .route("/courses/{course}/answer", post(handle_answer))
        .route("/blobs/{*path}", get(handle_blob))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
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

#[derive(Debug)]
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

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Ok => StatusCode::OK,
        ErrorKind::UnsupportedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::DecodeFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PermanentInternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        if let Error::InvalidRequest(message) = err {
            return bad_request(message);
        }
        let kind = err.kind();
        if kind == ErrorKind::PermanentInternalError {
            error!(error = %err, "request failed");
        }
        app_error(status_for(kind), kind.as_str(), err.to_string())
    }
}

fn scope_from(headers: &HeaderMap, course: String) -> Result<Scope, AppError> {
    let owner = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request(format!("missing {} header", OWNER_HEADER)))?;
    Ok(Scope::new(owner, course))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct IngestRequest {
    name: String,
    source_type: Option<String>,
    content_base64: String,
}

/// Handler for `POST /courses/{course}/documents`.
///
/// The source type defaults to the file name's extension.
async fn handle_ingest(
    State(state): State<AppState>,
    Path(course): Path<String>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    let scope = scope_from(&headers, course)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let source_type = match req.source_type {
        Some(t) => t,
        None => req
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default(),
    };

    let outcome = state
        .service
        .ingest_document(&scope, &req.name, &source_type, bytes)
        .await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct ListResponse {
    documents: Vec<DocumentInfo>,
}

async fn handle_list(
    State(state): State<AppState>,
    Path(course): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ListResponse>, AppError> {
    let scope = scope_from(&headers, course)?;
    let documents = state.service.list_documents(&scope).await?;
    Ok(Json(ListResponse { documents }))
}

#[derive(Serialize)]
struct CountResponse {
    count: i64,
}

async fn handle_count(
    State(state): State<AppState>,
    Path(course): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CountResponse>, AppError> {
    let scope = scope_from(&headers, course)?;
    let count = state.service.count_documents(&scope).await?;
    Ok(Json(CountResponse { count }))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path((course, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<DeleteOutcome>, AppError> {
    let scope = scope_from(&headers, course)?;
    let outcome = state.service.delete_document(&scope, &name).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct UrlResponse {
    url: String,
}

async fn handle_url(
    State(state): State<AppState>,
    Path((course, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<UrlResponse>, AppError> {
    let scope = scope_from(&headers, course)?;
    match state.service.document_url(&scope, &name).await? {
        Some(url) => Ok(Json(UrlResponse { url })),
        None => Err(not_found(format!("no document named {}", name))),
    }
}

// ============ POST /courses/{course}/answer ============

#[derive(Deserialize)]
struct AnswerRequest {
    question: String,
    #[serde(default)]
    prior_turns: Vec<Turn>,
}

async fn handle_answer(
    State(state): State<AppState>,
    Path(course): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResult>, AppError> {
    let scope = scope_from(&headers, course)?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let result = state
        .service
        .answer(&scope, &req.question, &req.prior_turns)
        .await?;
    Ok(Json(result))
}

// ============ GET /blobs/{*path} ============

#[derive(Deserialize)]
struct BlobQuery {
    expires: i64,
    signature: String,
}

async fn handle_blob(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<BlobQuery>,
) -> Result<Response, AppError> {
    let now = chrono::Utc::now().timestamp();
    if !state
        .blobs
        .verify(&path, query.expires, &query.signature, now)
    {
        return Err(app_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "invalid or expired signature",
        ));
    }

    match state.blobs.get(&path).await {
        Ok(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        Err(BlobError::NotFound(_)) => Err(not_found(format!("no blob at {}", path))),
        Err(e) => Err(Error::from(e).into()),
    }
}
