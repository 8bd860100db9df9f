//! System handlers: artifact download, health, events, shutdown.

use super::DownloadQuery;
use crate::api::AppState;
use crate::error::{ApiError, Error};
use crate::types::Event;
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{self, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use std::path::{Component, Path};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::io::ReaderStream;

/// GET /download - Serve a staged artifact
///
/// `file` is relative to the staging directory; absolute paths and `..`
/// components are rejected. `return` names the file for the client.
pub async fn download_artifact(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let relative = Path::new(&query.file);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if query.file.is_empty() || escapes {
        return ApiError::validation("file must be a path inside the staging directory")
            .into_response();
    }

    let path = state.controller.config().staging_dir().join(relative);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Error::NotFound(format!("file {}", query.file)).into_response();
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open artifact");
            return Error::Io(e).into_response();
        }
    };
    let length = file.metadata().await.map(|m| m.len()).ok();

    let name = query
        .return_name
        .filter(|n| !n.is_empty())
        .or_else(|| relative.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "download".to_string())
        .replace(['"', '\\', '\r', '\n'], "_");
    let content_type = if name.ends_with(".zip") {
        "application/zip"
    } else {
        "application/octet-stream"
    };

    let mut builder = http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", name),
        );
    if let Some(length) = length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    match builder.body(Body::from_stream(ReaderStream::new(file))) {
        Ok(response) => response,
        Err(e) => Error::ApiServerError(e.to_string()).into_response(),
    }
}

/// GET /health - Health check
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /events - Server-sent events stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.controller.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => {
                let event_type = match &event {
                    Event::Queued { .. } => "queued",
                    Event::Started { .. } => "started",
                    Event::PackageProgress { .. } => "package_progress",
                    Event::BundleComplete { .. } => "bundle_complete",
                    Event::Completed { .. } => "completed",
                    Event::Failed { .. } => "failed",
                    Event::Canceled { .. } => "canceled",
                    Event::WebhookFailed { .. } => "webhook_failed",
                    Event::Shutdown => "shutdown",
                };

                Some(Ok(SseEvent::default().event(event_type).data(json_data)))
            }
            Err(e) => {
                tracing::warn!("Failed to serialize event to JSON: {}", e);
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE client lagged, skipped {} events", skipped);
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// POST /shutdown - Graceful shutdown
///
/// Queued packages are canceled and running ones are given the configured
/// timeout to finish. New submissions are refused from here on.
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    tokio::spawn(async move {
        if let Err(e) = state.controller.shutdown().await {
            tracing::error!(error = %e, "Error during graceful shutdown");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "shutdown initiated"})),
    )
}
