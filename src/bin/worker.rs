use graymill::{
    config::AppConfig,
    services::{
        job_store::JobStore,
        storage::StorageBackend,
        transform::Grayscale,
        worker::Worker,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting graymill worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize the configured storage backend and verify it is reachable
    tracing::info!(backend = ?config.storage_backend, "Initializing storage backend");
    let storage =
        Arc::new(StorageBackend::from_config(&config).expect("Failed to initialize storage backend"));
    storage
        .ensure_ready()
        .await
        .expect("Storage namespace is not reachable");

    let store = Arc::new(JobStore::new(
        Arc::clone(&storage),
        config.claim_max_attempts,
        config.max_jobs,
    ));

    std::fs::create_dir_all(&config.scratch_dir).expect("Failed to create scratch directory");

    let worker = Worker::new(
        store,
        storage,
        Arc::new(Grayscale),
        Duration::from_millis(config.poll_interval_ms),
        config.scratch_dir.clone(),
    );

    // Shutdown is observed between polling cycles only, never mid-job.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
}
