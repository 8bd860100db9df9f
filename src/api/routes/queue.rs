//! Queue handlers.

use crate::api::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

/// GET /queue/stats - Scheduler statistics
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.stats().await)
}

/// GET /queue/status - Human-readable status report
///
/// `queue_long` is set while more packages wait than the configured warning size.
pub async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    let lines = state.controller.status_lines().await;
    let queue_long = state.controller.is_queue_long().await;

    Json(json!({
        "lines": lines,
        "queue_long": queue_long,
    }))
}
