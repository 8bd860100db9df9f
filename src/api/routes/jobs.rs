//! Worker job handlers.

use super::PackagingJobQuery;
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::types::PackageId;
use crate::worker::{DownloadScriptWorker, MemoryJob, PackagingWorker, Worker, WorkerRequest};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use std::sync::Arc;

/// POST /jobs/package - Run a packaging job
///
/// The job id is also the package id, so the package can be followed through
/// `GET /packages/:id` as well as `GET /jobs/:id`.
pub async fn start_packaging_job(
    State(state): State<AppState>,
    Query(query): Query<PackagingJobQuery>,
    Json(request): Json<WorkerRequest>,
) -> Result<impl IntoResponse> {
    // Resolve the processor up front so an unknown one is a 404, not a failed job
    state.processors.get(&request.processor_id)?;

    let worker = PackagingWorker::new(state.controller.as_ref().clone(), state.processors.clone())
        .with_immediate(query.immediate);
    let job_id = start_job(&state, Box::new(worker), request).await;

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

/// POST /jobs/script - Run a download-script job
pub async fn start_script_job(
    State(state): State<AppState>,
    Json(request): Json<WorkerRequest>,
) -> Result<impl IntoResponse> {
    state.processors.get(&request.processor_id)?;

    let worker = DownloadScriptWorker::from_controller(&state.controller, state.processors.clone());
    let job_id = start_job(&state, Box::new(worker), request).await;

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

/// GET /jobs/:id - Job status
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let jobs = state.jobs.read().await;
    let job = jobs
        .get(&id)
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
    Ok(Json(job.snapshot()))
}

/// Register a new job and run `worker` for it in the background
async fn start_job(state: &AppState, mut worker: Box<dyn Worker>, request: WorkerRequest) -> String {
    let job_id = PackageId::generate().0;
    let job = Arc::new(MemoryJob::new(job_id.clone()));
    state.jobs.write().await.insert(job_id.clone(), job.clone());

    worker.set_job(job);
    let id = job_id.clone();
    tokio::spawn(async move {
        match worker.do_command(&request).await {
            Ok(outcome) => {
                tracing::info!(job_id = %id, phase = ?outcome.phase, "Job finished");
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Job failed");
            }
        }
    });

    job_id
}
