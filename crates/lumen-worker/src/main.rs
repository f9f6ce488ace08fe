//! lumen background worker.
//!
//! Connects to PostgreSQL, rebuilds the in-memory embedding index, registers
//! the job handlers and processes the queue until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumen_core::{defaults, CaptionBackend};
use lumen_db::{log_pool_metrics, Database, FilesystemStorage, PoolConfig};
use lumen_inference::{
    HttpEmbeddingBackend, HttpImageFetcher, OllamaVisionBackend, RasterImageProcessor,
};
use lumen_jobs::{
    ArchiveImportHandler, CaptionHandler, EmbeddingHandler, ImportPipeline, JobRepository,
    UrlImportHandler, WorkerBuilder, WorkerConfig,
};
use lumen_vector::{DuplicateGrouper, EmbeddingStore};

/// How often finished jobs beyond the retention limit are purged.
const CLEANUP_INTERVAL_SECS: u64 = 3_600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "lumen_worker=debug,lumen_jobs=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lumen_worker=debug,lumen_jobs=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lumen-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Database
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    log_pool_metrics(&db.pool);

    // Embedding index, rebuilt from persisted blobs
    let store = Arc::new(EmbeddingStore::new());
    let blobs = db
        .images
        .load_embeddings()
        .await
        .context("Failed to load embeddings")?;
    let loaded = store
        .load_blobs(blobs)
        .context("Persisted embeddings are corrupt")?;
    info!(loaded, dimension = store.dimension(), "Embedding index ready");

    match DuplicateGrouper::new(store.clone()).find_groups(defaults::DUPLICATE_THRESHOLD) {
        Ok(groups) => info!(
            groups = groups.len(),
            threshold = defaults::DUPLICATE_THRESHOLD,
            "Duplicate scan finished"
        ),
        Err(e) => warn!(error = %e, "Duplicate scan failed"),
    }

    // Collaborators
    let storage = Arc::new(FilesystemStorage::from_env());
    storage
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("Storage is not usable: {}", e))?;

    let vision = OllamaVisionBackend::from_env().map(Arc::new);
    match &vision {
        Some(vision) => info!(model = %vision.model_name(), "Vision backend configured"),
        None => warn!("No vision model configured, imports will not queue caption jobs"),
    }

    let mut pipeline = ImportPipeline::new(
        storage.clone(),
        Arc::new(RasterImageProcessor::new()),
        db.images.clone(),
        db.jobs.clone(),
    );
    if vision.is_none() {
        pipeline = pipeline.without_captions();
    }

    let mut builder = WorkerBuilder::new(db.jobs.clone())
        .with_config(WorkerConfig::from_env())
        .with_notify(db.jobs.job_notify())
        .with_handler(EmbeddingHandler::new(
            db.images.clone(),
            storage.clone(),
            Arc::new(HttpEmbeddingBackend::from_env()),
            store.clone(),
        ))
        .with_handler(ArchiveImportHandler::new(
            db.sessions.clone(),
            pipeline.clone(),
        ))
        .with_handler(UrlImportHandler::new(
            db.sessions.clone(),
            Arc::new(HttpImageFetcher::new()),
            pipeline,
        ));

    if let Some(vision) = vision {
        builder = builder.with_handler(
            CaptionHandler::new(db.images.clone(), storage.clone(), vision.clone())
                .with_ocr(vision),
        );
    }

    let handle = builder.build().await.start();

    // Retention
    let cleanup_jobs = db.jobs.clone();
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match cleanup_jobs.cleanup(defaults::JOB_RETENTION_KEEP).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "Purged finished jobs"),
                Err(e) => warn!(error = %e, "Job cleanup failed"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, waiting for running jobs");

    cleanup.abort();
    handle.shutdown();
    handle.join().await?;

    db.pool.close().await;
    info!("Worker exited");
    Ok(())
}
