//! Error taxonomy for memobank operations.

use thiserror::Error;

/// Main error type for memobank operations.
///
/// Core operations return structured errors rather than panicking; batch
/// operations (bulk sync, bulk import) accumulate per-unit errors into
/// their report and keep going.
#[derive(Error, Debug)]
pub enum Error {
    #[error("store not initialized: run 'mbk init' first")]
    NotInitialized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for memobank operations.
pub type Result<T> = std::result::Result<T, Error>;
