//! Core traits for lumen abstractions.
//!
//! The job engine consumes every collaborator through these ports, so
//! handlers receive their dependencies at construction time and tests can
//! substitute in-memory fakes.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB REPOSITORY TRAITS
// =============================================================================

/// Repository for job queue operations.
///
/// Every transition is a conditional update on the current status, so two
/// callers racing on the same job cannot both succeed.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Enqueue a job in `waiting` with the default attempt bound.
    async fn add(&self, job_type: JobType, payload: JsonValue) -> Result<Job> {
        self.add_with_max_attempts(job_type, payload, crate::defaults::JOB_MAX_ATTEMPTS)
            .await
    }

    /// Enqueue a job with an explicit attempt bound (at least 1).
    async fn add_with_max_attempts(
        &self,
        job_type: JobType,
        payload: JsonValue,
        max_attempts: i32,
    ) -> Result<Job>;

    /// Claim the oldest `waiting` job whose type is in `job_types`.
    /// An empty slice means "claim any type".
    async fn acquire_job(&self, job_types: &[JobType]) -> Result<Option<Job>>;

    /// Record progress of an `active` job.
    ///
    /// `percent` is clamped to `0..=100` and never lowers the stored value.
    async fn update_progress(&self, job_id: Uuid, percent: i32, message: Option<&str>)
        -> Result<()>;

    /// Refresh the liveness timestamp of an `active` job without touching
    /// its progress.
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    /// Mark an `active` job as completed with its result.
    async fn complete_job(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<Job>;

    /// Fail the current attempt of an `active` job.
    ///
    /// Returns the job to `waiting` while attempts remain, otherwise marks it
    /// `failed`.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<Job>;

    /// Get job by ID.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// List jobs, newest first.
    async fn list_jobs(&self, query: &JobListQuery) -> Result<JobPage>;

    /// Get queue statistics.
    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Fail the current attempt of every `active` job that has not been
    /// claimed or reported progress within `older_than`, returning the
    /// updated jobs.
    async fn requeue_stale(&self, older_than: chrono::Duration) -> Result<Vec<Job>>;

    /// Delete the oldest terminal jobs beyond `keep_count`.
    async fn cleanup(&self, keep_count: i64) -> Result<i64>;
}

// =============================================================================
// IMAGE REPOSITORY TRAITS
// =============================================================================

/// Repository for image records and their embedding blobs.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Image>>;

    async fn find_by_id_with_embedding(&self, id: Uuid) -> Result<Option<ImageWithEmbedding>>;

    /// Fetch several images; missing ids are skipped.
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Image>>;

    /// Insert a new image record.
    async fn create(&self, image: NewImage) -> Result<Image>;

    /// Replace the stored embedding blob.
    async fn update_embedding(&self, id: Uuid, embedding: &[u8]) -> Result<()>;

    /// Replace the stored description.
    async fn update_description(&self, id: Uuid, description: &str) -> Result<()>;
}

// =============================================================================
// FILE STORAGE TRAITS
// =============================================================================

/// File storage port.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persist bytes under a new unique path derived from `file_name`.
    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<StoredFile>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn file_size(&self, path: &str) -> Result<u64>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Remove a file. Removing a missing file is not an error.
    async fn delete_file(&self, path: &str) -> Result<()>;
}

/// Image decoding port.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Decode dimensions and format; fails for data that is not an image.
    async fn metadata(&self, data: &[u8]) -> Result<ImageMetadata>;

    /// Produce an encoded thumbnail.
    async fn thumbnail(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for describing images using vision models.
#[async_trait]
pub trait CaptionBackend: Send + Sync {
    /// Describe an image, optionally grounding the prompt with extra context.
    async fn generate_caption(
        &self,
        image_data: &[u8],
        mime_type: &str,
        context: Option<&str>,
    ) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for reading text out of images.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Extract visible text. An image without text yields an empty string.
    async fn extract_text(&self, image_data: &[u8], mime_type: &str) -> Result<String>;
}

/// Backend for computing image embeddings.
#[async_trait]
pub trait ImageEmbeddingBackend: Send + Sync {
    async fn generate_embedding(&self, image_data: &[u8], mime_type: &str) -> Result<Vec<f32>>;

    /// Vector dimension produced by this backend.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

// =============================================================================
// IMPORT SESSION TRAITS
// =============================================================================

/// Store of uploaded archives awaiting selective import.
#[async_trait]
pub trait ArchiveSessions: Send + Sync {
    async fn find_session(&self, session_id: &str) -> Result<Option<ArchiveSession>>;

    /// Read the bytes of one entry.
    async fn read_entry(&self, session_id: &str, entry: &ArchiveEntry) -> Result<Vec<u8>>;
}

/// Store of crawl results awaiting selective import.
#[async_trait]
pub trait CrawlSessions: Send + Sync {
    async fn find_session(&self, session_id: &str) -> Result<Option<CrawlSession>>;
}

/// Fetches remote images.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage>;
}
