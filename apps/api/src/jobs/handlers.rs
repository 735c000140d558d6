use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::runner::start_job;
use crate::jobs::{JobSnapshot, OutputUnavailable};
use crate::outreach::handlers::xlsx_attachment;
use crate::state::AppState;

#[derive(Serialize)]
pub struct JobCreated {
    pub job_id: Uuid,
}

/// POST /api/v1/uploads/:id/jobs
pub async fn handle_start_job(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobCreated>), AppError> {
    let upload = state
        .jobs
        .upload(upload_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Upload {upload_id} not found")))?;

    let job_id = start_job(&state.jobs, state.pipeline.clone(), upload).await;
    Ok((StatusCode::ACCEPTED, Json(JobCreated { job_id })))
}

/// GET /api/v1/jobs/:id
pub async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .jobs
        .snapshot(id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
}

/// GET /api/v1/jobs/:id/download
pub async fn handle_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    match state.jobs.output(id).await {
        Ok((bytes, filename)) => Ok(xlsx_attachment(bytes, &filename)),
        Err(OutputUnavailable::NotFound) => Err(AppError::NotFound(format!("Job {id} not found"))),
        Err(OutputUnavailable::NotReady(status)) => Err(AppError::Conflict(format!(
            "Job {id} is {}; the result is only available once it has completed",
            status.as_str()
        ))),
    }
}

/// DELETE /api/v1/jobs/:id
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .jobs
        .cancel(id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
}
