//! HTTP control surface over the ingest pipeline.

pub mod rest;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use capitol_ingest::Controller;

pub struct AppState {
    pub controller: Controller,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/status", get(rest::status))
        .route("/start", post(rest::start))
        .route("/retry", post(rest::retry))
        .route("/cancel", post(rest::cancel))
        .route("/metrics", get(rest::metrics))
        .with_state(state)
        // Logging layer: method + path + status + latency
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}
