//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Hybrid search: `{query, limit?, explain?, rewrite?, rerank?}` |
//! | `POST` | `/enrich` | Start a background enrichment run: `{force?, max_chunks?}` |
//! | `GET`  | `/enrich/status` | Running flag, persisted job, pending counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "enrichment_in_progress", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `auth` (401), `enrichment_in_progress`
//! (409), `upstream` (502), `unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends
//! can call the API directly.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use starshelf_core::error::{classify, ShelfError};
use starshelf_core::retrieval::{RetrievalOptions, SearchOutcome};

use crate::context::AppContext;
use crate::enrich::{EnrichOptions, EnrichStatus};

/// Serve until the process is terminated.
///
/// A job left behind by an interrupted run is resumed in the background
/// before the listener starts accepting requests.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();

    let enrichment = ctx.enrichment.clone();
    tokio::spawn(async move {
        match enrichment.resume_pending().await {
            Ok(Some(report)) => info!(processed = report.processed, "resumed enrichment finished"),
            Ok(None) => {}
            Err(e) => error!("resuming enrichment failed: {:#}", e),
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/enrich", post(handle_enrich))
        .route("/enrich/status", get(handle_enrich_status))
        .layer(cors)
        .with_state(ctx)
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let (status, code) = match classify(&err) {
            Some(ShelfError::Auth(_)) => (StatusCode::UNAUTHORIZED, "auth"),
            Some(ShelfError::EnrichmentInProgress) => {
                (StatusCode::CONFLICT, "enrichment_in_progress")
            }
            Some(ShelfError::Parse(_)) => (StatusCode::BAD_GATEWAY, "upstream"),
            Some(ShelfError::TransientNetwork(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: format!("{:#}", err),
        }
    }
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

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    #[serde(default)]
    explain: bool,
    rewrite: Option<bool>,
    rerank: Option<bool>,
}

async fn handle_search(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchOutcome>, AppError> {
    let limit = req.limit.unwrap_or(ctx.config.retrieval.final_limit);
    if limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }
    let opts = RetrievalOptions {
        rewrite: req.rewrite.unwrap_or(ctx.config.ai.rewrite_queries),
        rerank: req.rerank.unwrap_or(ctx.config.ai.rerank),
        explain: req.explain,
        limit,
    };
    let outcome = ctx.retrieval.search(&req.query, &opts).await?;
    Ok(Json(outcome))
}

// ============ POST /enrich ============

#[derive(Deserialize, Default)]
struct EnrichRequest {
    #[serde(default)]
    force: bool,
    max_chunks: Option<usize>,
}

#[derive(Serialize)]
struct EnrichStarted {
    started: bool,
}

async fn handle_enrich(
    State(ctx): State<Arc<AppContext>>,
    body: Bytes,
) -> Result<(StatusCode, Json<EnrichStarted>), AppError> {
    // The body is optional; an empty POST starts a default run.
    let req: EnrichRequest = if body.is_empty() {
        EnrichRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    ctx.enrichment.start(EnrichOptions {
        force: req.force,
        max_chunks: req.max_chunks,
    })?;
    Ok((StatusCode::ACCEPTED, Json(EnrichStarted { started: true })))
}

// ============ GET /enrich/status ============

async fn handle_enrich_status(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<EnrichStatus>, AppError> {
    Ok(Json(ctx.enrichment.status().await?))
}
