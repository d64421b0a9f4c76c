//! Application error types

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Source unreachable or timed out. Retried with backoff.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unparseable provider payload. Never retried; the offending
    /// input is retained in the message for manual inspection.
    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage failure outside the expected upsert path.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a retry can plausibly succeed. Only transport failures
    /// qualify; malformed data stays malformed on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
