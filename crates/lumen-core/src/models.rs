//! Core data models for lumen.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::Error;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Wire name of the caption generation job type.
pub const CAPTION_JOB_TYPE: &str = "caption-generation";

/// Wire name of the embedding generation job type.
pub const EMBEDDING_JOB_TYPE: &str = "embedding-generation";

/// Wire name of the archive import job type.
pub const ARCHIVE_IMPORT_JOB_TYPE: &str = "archive-import";

/// Wire name of the URL crawl import job type.
pub const URL_IMPORT_JOB_TYPE: &str = "url-import";

/// Job processing status.
///
/// `waiting → active → {completed | waiting (retry) | failed}`; nothing
/// leaves `completed` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Waiting,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// Compute and store an image embedding
    #[serde(rename = "embedding-generation")]
    EmbeddingGeneration,
    /// Describe an image with the vision model
    #[serde(rename = "caption-generation")]
    CaptionGeneration,
    /// Import selected entries of an uploaded archive
    #[serde(rename = "archive-import")]
    ArchiveImport,
    /// Import selected images discovered by a URL crawl
    #[serde(rename = "url-import")]
    UrlImport,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::EmbeddingGeneration,
        JobType::CaptionGeneration,
        JobType::ArchiveImport,
        JobType::UrlImport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::EmbeddingGeneration => EMBEDDING_JOB_TYPE,
            JobType::CaptionGeneration => CAPTION_JOB_TYPE,
            JobType::ArchiveImport => ARCHIVE_IMPORT_JOB_TYPE,
            JobType::UrlImport => URL_IMPORT_JOB_TYPE,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown job type: {s}")))
    }
}

// =============================================================================
// JOB RECORDS
// =============================================================================

/// A unit of background work tracked through the queue state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: JsonValue,
    pub progress: i32,
    pub progress_message: Option<String>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a freshly enqueued job.
    pub fn new(id: Uuid, job_type: JobType, payload: JsonValue, max_attempts: i32) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type,
            status: JobStatus::Waiting,
            payload,
            progress: 0,
            progress_message: None,
            result: None,
            error: None,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a failure of the current attempt returns the job to `waiting`.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// Filters for listing jobs.
///
/// An empty `statuses` list matches every status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobListQuery {
    pub statuses: Vec<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobListQuery {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            job_type: None,
            limit: defaults::PAGE_LIMIT,
            offset: defaults::PAGE_OFFSET,
        }
    }
}

impl JobListQuery {
    /// Build a query from raw request parameters.
    ///
    /// `status` may be a single value or a comma-separated set. Unknown
    /// statuses and job types are dropped rather than rejected, and
    /// out-of-range paging values fall back to defaults.
    pub fn parse(
        status: Option<&str>,
        job_type: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Self {
        let mut statuses = Vec::new();
        for part in status.unwrap_or_default().split(',') {
            if let Ok(s) = part.trim().to_ascii_lowercase().parse::<JobStatus>() {
                if !statuses.contains(&s) {
                    statuses.push(s);
                }
            }
        }

        let job_type = job_type.and_then(|t| t.trim().parse::<JobType>().ok());

        Self {
            statuses,
            job_type,
            limit: page_limit(limit.unwrap_or(0)),
            offset: page_offset(offset.unwrap_or(defaults::PAGE_OFFSET)),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    /// Non-positive limits fall back to the default page size.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = page_limit(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = page_offset(offset);
        self
    }

    /// Whether a job satisfies the status and type filters.
    pub fn matches(&self, job: &Job) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.job_type.map_or(true, |t| t == job.job_type)
    }
}

fn page_limit(limit: i64) -> i64 {
    if limit > 0 {
        limit.min(defaults::PAGE_LIMIT_MAX)
    } else {
        defaults::PAGE_LIMIT
    }
}

fn page_offset(offset: i64) -> i64 {
    if offset >= 0 {
        offset
    } else {
        defaults::PAGE_OFFSET
    }
}

/// One page of a job listing plus the unpaged match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
}

// =============================================================================
// JOB PAYLOADS
// =============================================================================

/// Payload for jobs that target a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJobPayload {
    pub image_id: Uuid,
}

/// Payload for batch import jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobPayload {
    pub session_id: String,
    pub indices: Vec<usize>,
}

// =============================================================================
// IMAGES
// =============================================================================

/// Stored image record as seen by the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: Uuid,
    pub file_name: String,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Image record together with its raw embedding blob, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageWithEmbedding {
    pub image: Image,
    pub embedding: Option<Vec<u8>>,
}

/// Request to create an image record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub file_name: String,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
}

/// Result of saving a file through the storage port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Storage-relative path to pass back to read/delete.
    pub path: String,
    pub size_bytes: u64,
    pub content_hash: String,
}

/// Decoded image properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

// =============================================================================
// IMPORT SESSIONS
// =============================================================================

/// An uploaded archive whose entries have been listed for selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSession {
    pub id: String,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveSession {
    pub fn entry(&self, index: usize) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.index == index)
    }
}

/// One file inside an archive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub name: String,
    pub size_bytes: u64,
}

/// Images discovered by crawling a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSession {
    pub id: String,
    pub images: Vec<CrawledImage>,
}

impl CrawlSession {
    pub fn image(&self, index: usize) -> Option<&CrawledImage> {
        self.images.iter().find(|i| i.index == index)
    }
}

/// One image reference found by a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledImage {
    pub index: usize,
    pub url: String,
    pub alt_text: Option<String>,
}

/// Bytes fetched from a remote image URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

// =============================================================================
// SIMILARITY
// =============================================================================

/// One neighbour returned by a similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResult {
    pub image_id: Uuid,
    /// Cosine distance in `[0, 2]`.
    pub distance: f64,
}

/// Images whose embeddings are transitively within the duplicate threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// Sorted ascending, at least two members.
    pub image_ids: Vec<Uuid>,
}
