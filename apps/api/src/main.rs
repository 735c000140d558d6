mod config;
mod errors;
mod jobs;
mod llm_client;
mod outreach;
mod routes;
mod state;
mod table;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::Config;
use crate::jobs::runner::spawn_sweeper;
use crate::jobs::JobStore;
use crate::llm_client::LlmClient;
use crate::outreach::pipeline::RowPipeline;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Outreach API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client; the credential is handed over once here
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        config.anthropic_api_url.clone(),
    )?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let pipeline = RowPipeline::new(Arc::new(llm), config.pipeline_settings());
    let settings = pipeline.settings();
    info!(
        "Pipeline: gate {:?}, chunk size {}, concurrency {}, {} attempts",
        settings.gate, settings.chunk_size, settings.max_concurrency, settings.retry.max_attempts
    );

    // In-memory uploads and jobs, swept after JOB_TTL_SECS
    let jobs = JobStore::new();
    spawn_sweeper(jobs.clone(), config.job_ttl());

    let state = AppState {
        pipeline,
        jobs,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS once the frontend origin is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
