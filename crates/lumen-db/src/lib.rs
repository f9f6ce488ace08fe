//! # lumen-db
//!
//! Persistence layer for the lumen job engine.
//!
//! This crate provides:
//! - Connection pool management
//! - A PostgreSQL job queue with `FOR UPDATE SKIP LOCKED` claiming
//! - An in-memory job queue with identical transition rules
//! - Image records with raw embedding blobs
//! - Archive and crawl import sessions
//! - Filesystem image storage
//!
//! ## Example
//!
//! ```rust,ignore
//! use lumen_db::{Database, JobRepository, JobType};
//!
//! let db = Database::connect("postgres://localhost/lumen").await?;
//! db.migrate().await?;
//! let job = db.jobs.add(JobType::EmbeddingGeneration, payload).await?;
//! ```

pub mod error;
pub mod file_storage;
pub mod images;
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod sessions;

// Always compiled so integration tests in tests/ can share the default URL.
pub mod test_fixtures;

use std::sync::Arc;

pub use lumen_core::*;

pub use error::{map_sqlx_error, repository_error_kind};
pub use file_storage::{compute_content_hash, generate_storage_path, FilesystemStorage};
pub use images::PgImageRepository;
pub use jobs::PgJobRepository;
pub use memory::MemoryJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use sessions::{NewArchiveEntry, PgSessionRepository};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub jobs: Arc<PgJobRepository>,
    pub images: Arc<PgImageRepository>,
    pub sessions: Arc<PgSessionRepository>,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            images: Arc::new(PgImageRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
