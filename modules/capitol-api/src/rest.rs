use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use capitol_ingest::{RunMode, StartError};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;

pub async fn health() -> &'static str {
    "ok"
}

/// Never waits on a run: reads the controller's in-memory state and ledger size.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.status().await)
}

pub async fn start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    launch(&state, RunMode::Full)
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryParams {
    #[serde(default)]
    pub force: bool,
}

pub async fn retry(State(state): State<Arc<AppState>>, Query(params): Query<RetryParams>) -> impl IntoResponse {
    launch(&state, RunMode::Retry { force: params.force })
}

pub async fn cancel(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.controller.cancel() {
        (StatusCode::ACCEPTED, Json(json!({"status": "cancelling"})))
    } else {
        (StatusCode::CONFLICT, Json(json!({"error": "No run in progress"})))
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.controller.pipeline().metrics().render() {
        Some(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

fn launch(state: &AppState, mode: RunMode) -> (StatusCode, Json<serde_json::Value>) {
    match state.controller.try_start(mode) {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "started", "run_id": run_id})),
        ),
        Err(StartError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "Run already in progress"})),
        ),
    }
}
