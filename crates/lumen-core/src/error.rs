//! Error types for lumen.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using lumen's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage-engine independent classification of repository failures.
///
/// Repository implementations translate their engine's error codes into
/// one of these kinds, so callers never match on SQLSTATEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Unique constraint violated.
    Conflict,
    /// Referenced row does not exist.
    NotFound,
    /// Foreign key constraint violated.
    ForeignKeyViolation,
    /// Anything else (connection loss, syntax, timeouts).
    Other,
}

impl RepositoryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryErrorKind::Conflict => "conflict",
            RepositoryErrorKind::NotFound => "not_found",
            RepositoryErrorKind::ForeignKeyViolation => "foreign_key_violation",
            RepositoryErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for lumen operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Repository operation failed
    #[error("Repository error ({kind}): {message}")]
    Repository {
        kind: RepositoryErrorKind,
        message: String,
    },

    /// Job does not exist
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Transition attempted from the wrong state
    #[error("Invalid job state: job {job_id} is {actual}, expected {expected}")]
    InvalidJobState {
        job_id: Uuid,
        actual: JobStatus,
        expected: JobStatus,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Vector length differs from the configured dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted embedding blob has the wrong byte length
    #[error("Corrupt embedding: expected {expected} bytes, got {actual}")]
    CorruptEmbedding { expected: usize, actual: usize },

    /// File storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a repository error of the given kind.
    pub fn repository(kind: RepositoryErrorKind, message: impl Into<String>) -> Self {
        Error::Repository {
            kind,
            message: message.into(),
        }
    }

    /// Repository error kind, if this is a repository error.
    pub fn repository_kind(&self) -> Option<RepositoryErrorKind> {
        match self {
            Error::Repository { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The underlying message without the variant prefix, for reporting a
    /// collaborator failure as-is (e.g. "disk full" rather than
    /// "Storage error: disk full"). Variants without a free-form message
    /// fall back to their display text.
    pub fn detail(&self) -> String {
        match self {
            Error::Repository { message, .. } => message.clone(),
            Error::NotFound(m)
            | Error::Storage(m)
            | Error::Inference(m)
            | Error::Serialization(m)
            | Error::Config(m)
            | Error::InvalidInput(m)
            | Error::Request(m)
            | Error::Internal(m) => m.clone(),
            Error::Io(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the error is a server-side fault rather than bad input.
    ///
    /// Embedding corruption and dimension mismatches on stored data land
    /// here: they mean persisted state is wrong, not that the caller erred.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Internal(_)
                | Error::CorruptEmbedding { .. }
                | Error::DimensionMismatch { .. }
                | Error::Repository {
                    kind: RepositoryErrorKind::Other,
                    ..
                }
        )
    }

    /// Whether the error means a referenced entity is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::JobNotFound(_)
                | Error::Repository {
                    kind: RepositoryErrorKind::NotFound,
                    ..
                }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
