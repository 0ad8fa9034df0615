mod app_state;
mod config;
mod db;
mod models;
mod pipeline;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use pipeline::knowledge::KnowledgeBase;
use pipeline::orchestrator::Orchestrator;
use services::llm::ModelRouterClient;
use services::storage::ImageStore;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing realism-engine server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "pipeline_job_duration_seconds",
        "Time to run the full enhancement pipeline for a job"
    );
    metrics::describe_counter!(
        "enhancement_jobs_submitted_total",
        "Total enhancement jobs submitted via upload"
    );
    metrics::describe_counter!(
        "pipeline_jobs_completed_total",
        "Total pipeline jobs that completed"
    );
    metrics::describe_counter!(
        "pipeline_jobs_failed_total",
        "Total pipeline jobs that failed"
    );
    metrics::describe_counter!(
        "pipeline_jobs_degraded_total",
        "Completed jobs where at least one stage used a fallback output"
    );
    metrics::describe_counter!(
        "pipeline_stage_degraded_total",
        "Stage-level fallback activations, labeled by stage"
    );
    metrics::describe_counter!(
        "client_track_events_total",
        "Client telemetry events received"
    );

    // Initialize SQLite job store
    tracing::info!("Connecting to job store at {}", config.database_url);
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to open job store database");
    db::init_schema(&db_pool)
        .await
        .expect("Failed to initialize job store schema");

    // Initialize image storage
    let store = Arc::new(ImageStore::new(&config.storage_path));

    // Initialize model client
    tracing::info!("Initializing model client for {}", config.llm_base_url);
    let llm = ModelRouterClient::new(
        &config.llm_base_url,
        &config.llm_api_key,
        &config.llm_model,
        &config.llm_vision_model,
        Duration::from_secs(config.llm_timeout_secs),
    )
    .expect("Failed to initialize model client");

    // Load the scene-rules knowledge base
    let knowledge = match &config.knowledge_path {
        Some(path) => {
            tracing::info!("Loading scene rules from {}", path);
            KnowledgeBase::from_file(path).expect("Failed to load scene rules file")
        }
        None => KnowledgeBase::builtin(),
    };

    let orchestrator = Orchestrator::new(
        db_pool.clone(),
        store.clone(),
        Arc::new(llm),
        Arc::new(knowledge),
        config.max_concurrent_jobs,
        config.detector_max_signals,
    );

    // Create shared application state
    let body_limit = config.max_image_size + 64 * 1024; // multipart framing headroom
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(db_pool, store, orchestrator, config);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/upload", post(routes::enhance::upload))
        .route("/process/{job_id}", post(routes::enhance::start_processing))
        .route("/result/{job_id}", get(routes::enhance::get_result))
        .route("/analyze", post(routes::enhance::analyze))
        .route("/track", post(routes::enhance::track))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting realism-engine on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
