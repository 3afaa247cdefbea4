use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    ingest_stats::IngestSnapshot,
    manager::ConnectionManager,
    models::TransactionRecord,
    store::{AppStore, StoreSnapshot, HISTORY_CAPACITY},
};

const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AppStore>,
    pub manager: ConnectionManager,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RecentResponse {
    transactions: Vec<TransactionRecord>,
}

#[derive(Serialize)]
struct RetryResponse {
    ok: bool,
    error: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stats(State(state): State<AppState>) -> Json<StoreSnapshot> {
    Json(state.store.snapshot())
}

async fn ingest_stats(State(state): State<AppState>) -> Json<IngestSnapshot> {
    Json(state.manager.stats())
}

async fn latest_block(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.latest_block() {
        Some(block) => Json(block).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn recent_transactions(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<RecentResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(HISTORY_CAPACITY);
    Json(RecentResponse {
        transactions: state.store.recent_transactions(limit),
    })
}

async fn retry_connection(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.force_real_data_mode().await {
        Ok(()) => {
            state.store.set_status(state.manager.state());
            (
                StatusCode::OK,
                Json(RetryResponse {
                    ok: true,
                    error: None,
                }),
            )
        }
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RetryResponse {
                ok: false,
                error: Some(err.to_string()),
            }),
        ),
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/stats/ingest", get(ingest_stats))
        .route("/block/latest", get(latest_block))
        .route("/tx/recent", get(recent_transactions))
        .route("/connection/retry", post(retry_connection))
        .with_state(state)
}

pub async fn run_http_server(addr: &str, state: AppState) -> Result<()> {
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
