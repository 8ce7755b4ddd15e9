//! Error types for the rate limiter.

use thiserror::Error;

use crate::storage::StorageError;

/// Main error type for rate limiter operations.
///
/// Limiter decisions never surface these; they are returned by
/// construction, configuration loading and the collaborators.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Periodic scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;
