//! Error types for the sync pipeline

use crate::error::AppError;
use crate::search::SearchError;

/// Result type for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors that can occur in the sync pipeline
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Relational store access failed
    #[error("Source error: {0}")]
    Source(String),

    /// Change stream read failed
    #[error("Stream error: {0}")]
    Stream(String),

    /// Checkpoint load/advance failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Index write failed
    #[error("Index error: {0}")]
    Index(#[from] SearchError),
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        AppError::Sync(err.to_string())
    }
}
