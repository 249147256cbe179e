//! HTTP request handlers.

use super::AppState;
use crate::metrics::MODE_WSPR;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

pub async fn handle_health() -> &'static str {
    "ok"
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.status().await)
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.report())
}

/// Metrics for one band, or 404 if nothing was ever recorded for it.
pub async fn handle_band_metrics(
    State(state): State<AppState>,
    Path(band): Path<String>,
) -> impl IntoResponse {
    let report = state.metrics.report();
    match report
        .series
        .into_iter()
        .find(|s| s.mode == MODE_WSPR && s.band == band)
    {
        Some(series) => Json(series).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no metrics for band {}", band)).into_response(),
    }
}
