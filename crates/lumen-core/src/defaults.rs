//! Centralized default constants for the lumen job engine and similarity core.
//!
//! Every crate references these constants instead of defining its own magic
//! numbers. Organized by domain area.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Fixed length of every image embedding vector.
pub const EMBEDDING_DIMENSION: usize = 512;

/// Byte length of a persisted embedding blob (little-endian f32 per element).
pub const EMBEDDING_BYTE_LEN: usize = EMBEDDING_DIMENSION * std::mem::size_of::<f32>();

/// Default image embedding model name.
pub const EMBED_MODEL: &str = "clip-vit-b-32";

/// Default URL of the image embedding service.
pub const EMBEDDING_URL: &str = "http://127.0.0.1:8100";

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// SIMILARITY
// =============================================================================

/// Largest possible cosine distance between two vectors.
pub const MAX_COSINE_DISTANCE: f64 = 2.0;

/// Distances below this are treated as exactly zero.
///
/// Normalising float noise away keeps identical vectors grouped together
/// regardless of how small the caller's threshold is.
pub const DISTANCE_EPSILON: f64 = 1e-9;

/// Default duplicate threshold (fraction of [`MAX_COSINE_DISTANCE`]).
pub const DUPLICATE_THRESHOLD: f64 = 0.05;

/// Default number of neighbours returned by "similar images".
pub const SIMILAR_LIMIT: usize = 20;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for job listings.
pub const PAGE_LIMIT: i64 = 50;

/// Upper bound on a single job listing page.
pub const PAGE_LIMIT_MAX: i64 = 500;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum attempts per job (first run included).
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Default worker poll interval in milliseconds when the queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Default number of independent worker loops.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Age after which an `active` job is considered abandoned (seconds).
///
/// Zero disables the stale sweep.
pub const JOB_STALE_AFTER_SECS: u64 = 1_800;

/// Error recorded on jobs recovered by the stale sweep.
pub const JOB_ABANDONED_MESSAGE: &str = "Job abandoned by worker";

/// Number of terminal jobs kept by the retention sweep.
pub const JOB_RETENTION_KEEP: i64 = 10_000;

/// Default worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default interval for client-side job status polling in milliseconds.
pub const JOB_WATCH_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Environment variable for the vision model name.
pub const ENV_OLLAMA_VISION_MODEL: &str = "OLLAMA_VISION_MODEL";

/// Default vision model for captioning and OCR.
pub const DEFAULT_OLLAMA_VISION_MODEL: &str = "qwen3-vl:8b";

/// Timeout for vision generation requests in seconds.
pub const VISION_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// IMPORT
// =============================================================================

/// Maximum bytes accepted from a single crawled image URL (25 MB).
pub const FETCH_MAX_BYTES: usize = 25 * 1024 * 1024;

/// Timeout for fetching a crawled image in seconds.
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Longest edge of generated thumbnails in pixels.
pub const THUMBNAIL_SIZE: u32 = 320;

/// Default on-disk storage root.
pub const STORAGE_PATH: &str = "./data/storage";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_byte_len_matches_dimension() {
        const {
            assert!(EMBEDDING_BYTE_LEN == EMBEDDING_DIMENSION * 4);
        }
    }

    #[test]
    fn page_limits_ordered() {
        const {
            assert!(PAGE_LIMIT <= PAGE_LIMIT_MAX);
            assert!(PAGE_OFFSET == 0);
        }
    }

    #[test]
    fn duplicate_threshold_in_range() {
        assert!(DUPLICATE_THRESHOLD > 0.0 && DUPLICATE_THRESHOLD <= 1.0);
    }

    #[test]
    fn job_defaults_are_usable() {
        const {
            assert!(JOB_MAX_ATTEMPTS >= 1);
            assert!(JOB_MAX_CONCURRENT >= 1);
        }
    }
}
