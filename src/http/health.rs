//! `/health`, `/healthz`, `/readyz`, `/metrics` (C17/C19 ambient surface). Grounded on
//! `packages/canceler/src/server.rs`'s liveness/readiness handler pair, extended with
//! a Prometheus scrape endpoint per `metrics.rs`.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub status: &'static str,
}

pub async fn health() -> impl IntoResponse {
    axum::Json(HealthView { status: "ok" })
}

pub async fn liveness() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(state.store.pool()).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn metrics() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
