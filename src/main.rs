mod app_state;
mod config;
mod models;
mod routes;
mod services;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{job_store::JobStore, storage::StorageBackend};

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

    tracing::info!(backend = ?config.storage_backend, "Initializing graymill server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("jobs_submitted_total", "Total jobs submitted");
    metrics::describe_counter!("jobs_completed_total", "Total jobs processed to DONE");
    metrics::describe_counter!("jobs_failed_total", "Total jobs processed to FAILED");
    metrics::describe_histogram!(
        "job_processing_seconds",
        "Time from claim to persisted outcome for one job"
    );

    // Initialize the configured storage backend and verify it is reachable
    tracing::info!("Initializing storage backend");
    let storage =
        Arc::new(StorageBackend::from_config(&config).expect("Failed to initialize storage backend"));
    storage
        .ensure_ready()
        .await
        .expect("Storage namespace is not reachable");

    // Job registry on top of the backend
    let jobs = Arc::new(JobStore::new(
        Arc::clone(&storage),
        config.claim_max_attempts,
        config.max_jobs,
    ));

    let state = AppState::new(jobs, storage);

    // Build API routes
    let app = Router::new()
        .route("/jobs", post(routes::jobs::submit_job))
        .route("/jobs/{id}", get(routes::jobs::job_status))
        .route("/jobs/{id}/result", get(routes::jobs::job_result))
        .route("/health", get(routes::health::health_check))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        // Both limits track MAX_UPLOAD_BYTES: axum's built-in 2 MB default
        // would otherwise cap multipart reads regardless of the tower layer.
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting graymill on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
