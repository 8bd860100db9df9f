//! Package handlers.

use crate::api::AppState;
use crate::controller::PackageRequest;
use crate::error::Result;
use crate::types::PackageId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

/// POST /packages - Queue a package
///
/// Returns 202 with the package id and the lane it waits in. Progress is
/// reported through `GET /packages/:id` and the event stream.
pub async fn submit_package(
    State(state): State<AppState>,
    Json(request): Json<PackageRequest>,
) -> Result<impl IntoResponse> {
    let handle = state.controller.submit_request(request).await?;

    tracing::info!(package_id = %handle.id(), lane = ?handle.lane(), "Package submitted via API");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": handle.id(),
            "lane": handle.lane(),
        })),
    ))
}

/// GET /packages/:id - Package status report
pub async fn get_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = PackageId::new(id);
    let report = state.controller.status(&id)?;
    let queued = state.controller.is_queued(&id).await;

    Ok(Json(json!({
        "report": report,
        "queued": queued,
    })))
}

/// DELETE /packages/:id - Cancel a package
///
/// Queued packages never start; running packages stop after the current file
/// and their partial zips are removed.
pub async fn cancel_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = PackageId::new(id);
    state.controller.cancel(&id).await?;

    tracing::info!(package_id = %id, "Package canceled via API");

    Ok(StatusCode::NO_CONTENT)
}
