use crate::config::Config;
use crate::jobs::JobStore;
use crate::outreach::pipeline::RowPipeline;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pipeline built from `Config` with the provider client baked in.
    pub pipeline: RowPipeline,
    pub jobs: JobStore,
    pub config: Config,
}
