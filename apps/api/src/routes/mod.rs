pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::jobs::handlers as jobs;
use crate::outreach::handlers as outreach;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/health", get(health::health_handler))
        // Single request: upload in, workbook out
        .route("/api/v1/outreach/generate", post(outreach::handle_generate))
        // Multi-step: upload, confirm mapping, run as a job
        .route("/api/v1/uploads", post(outreach::handle_upload))
        .route(
            "/api/v1/uploads/:id/mapping",
            put(outreach::handle_set_mapping),
        )
        .route("/api/v1/uploads/:id/jobs", post(jobs::handle_start_job))
        .route(
            "/api/v1/jobs/:id",
            get(jobs::handle_job_status).delete(jobs::handle_cancel),
        )
        .route("/api/v1/jobs/:id/download", get(jobs::handle_download))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
