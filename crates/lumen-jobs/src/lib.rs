//! # lumen-jobs
//!
//! Background job processing for the lumen image library.
//!
//! This crate provides:
//! - Worker loops that claim jobs from any [`JobRepository`] and run them
//! - Progress tracking and notifications via broadcast channels
//! - Retry through the queue's attempt bound, with panics normalised to failures
//! - Handlers for embeddings, captions, and archive and URL imports
//! - [`JobWatcher`] for cancellable status polling
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lumen_jobs::{JobType, NoOpHandler, WorkerBuilder, WorkerConfig};
//! use lumen_db::MemoryJobRepository;
//!
//! let jobs = Arc::new(MemoryJobRepository::new());
//!
//! let worker = WorkerBuilder::new(jobs.clone())
//!     .with_config(WorkerConfig::default().with_poll_interval(250))
//!     .with_handler(NoOpHandler::new(JobType::EmbeddingGeneration))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//!
//! // Graceful shutdown: running jobs finish first.
//! handle.shutdown();
//! handle.join().await?;
//! ```

pub mod batch;
pub mod handler;
pub mod handlers;
pub mod poll;
pub mod worker;

// Re-export core types
pub use lumen_core::*;

pub use batch::{BatchImportResult, BatchItemResult};
pub use handler::{panic_message, JobContext, JobHandler, JobResult, NoOpHandler};
pub use handlers::{
    ArchiveImportHandler, CaptionHandler, CaptionResult, EmbeddingHandler, ImportPipeline,
    UrlImportHandler,
};
pub use poll::JobWatcher;
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = lumen_core::defaults::JOB_POLL_INTERVAL_MS;

/// Failure message for panics that carry no string payload.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";
