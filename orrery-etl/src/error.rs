//! Error taxonomy for the ingestion pipeline
//!
//! Attempt-level failures are errors; row-level rule violations are not —
//! they travel inside the validation report and end up quarantined, so a
//! bad record can never abort a batch.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum EtlError {
    /// Source container is unreadable or corrupt (fatal for the attempt, no retry)
    #[error("Source error ({path}): {message}")]
    Source { path: PathBuf, message: String },

    /// Rule set itself is invalid (bad regex, inconsistent range)
    #[error("Validation configuration error: {0}")]
    Validation(String),

    /// Same content hash already loaded successfully; callers treat as a skip
    #[error("Duplicate load: content hash {content_hash} already loaded by attempt {attempt_id}")]
    DuplicateLoad {
        content_hash: String,
        attempt_id: Uuid,
    },

    /// Transactional commit failed; the attempt is rolled back and retry-safe
    #[error("Write failure: {0}")]
    Write(String),

    /// Timeout or temporary unavailability; retried with backoff before
    /// escalating to a write failure
    #[error("Transient error: {0}")]
    Transient(String),

    /// In-flight batch was cancelled before commit
    #[error("Attempt cancelled")]
    Cancelled,

    /// Shared error (database, IO, config)
    #[error(transparent)]
    Common(#[from] orrery_common::Error),
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        EtlError::Common(orrery_common::Error::Database(err))
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Common(orrery_common::Error::Io(err))
    }
}

/// Result type for pipeline operations
pub type EtlResult<T> = Result<T, EtlError>;
