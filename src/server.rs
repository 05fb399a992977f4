//! JSON HTTP layer: article/source reads and run triggers.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /api/articles` | filtered article views, newest first |
//! | `GET /api/sources` | registry with bookkeeping |
//! | `POST /api/scrape/run` | full run |
//! | `POST /api/scrape/run-selected` | bounded run over chosen sources |
//! | `POST /api/scrape/sources/{id}/run` | single-source run |
//! | `GET /api/scrape/status` | `{running}` |
//! | `GET /api/scrape/runs`, `GET /api/scrape/runs/{id}` | run ledger |
//!
//! A run request while another run is active answers `409` with
//! `{"error": "scrape already in progress"}`.

use crate::error::RunError;
use crate::models::{ArticleFilter, RunResult};
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::store::Store;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn Store>,
}

#[derive(Debug, Deserialize)]
pub struct RunSelectedBody {
    source_ids: Vec<i64>,
    timeout_ms: Option<u64>,
    max_articles: Option<usize>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/articles", get(api_articles))
        .route("/api/sources", get(api_sources))
        .route("/api/scrape/run", post(api_run_all))
        .route("/api/scrape/run-selected", post(api_run_selected))
        .route("/api/scrape/sources/{id}/run", post(api_run_single))
        .route("/api/scrape/status", get(api_status))
        .route("/api/scrape/runs", get(api_runs))
        .route("/api/scrape/runs/{id}", get(api_run_detail))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state)).await
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn run_response(result: Result<RunResult, RunError>) -> Response {
    match result {
        Ok(result) => Json(result).into_response(),
        Err(e @ RunError::Busy) => error_body(StatusCode::CONFLICT, e.to_string()),
        Err(e @ RunError::UnknownSource(_)) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => {
            error!(error = %e, "Run request failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// --- Handlers ---

async fn api_articles(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ArticleFilter>,
) -> impl IntoResponse {
    match state.store.query_articles(&filter).await {
        Ok(articles) => Json(articles).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to query articles");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn api_sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.list_sources().await {
        Ok(sources) => Json(sources).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list sources");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn api_run_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    run_response(state.orchestrator.run_all().await)
}

async fn api_run_selected(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunSelectedBody>,
) -> impl IntoResponse {
    if body.source_ids.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "source_ids must not be empty");
    }
    let options = RunOptions {
        timeout: body.timeout_ms.map(Duration::from_millis),
        max_articles: body.max_articles,
    };
    run_response(state.orchestrator.run_selected(&body.source_ids, options).await)
}

async fn api_run_single(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    run_response(state.orchestrator.run_single(id).await)
}

async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "running": state.orchestrator.is_running() }))
}

async fn api_runs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.recent_runs())
}

async fn api_run_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get_run(&id) {
        Some(run) => Json(run).into_response(),
        None => error_body(StatusCode::NOT_FOUND, format!("run {id} not found")),
    }
}
