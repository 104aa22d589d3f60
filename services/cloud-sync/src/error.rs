use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while syncing a single segment.
///
/// Only [`SyncError::DestinationUnavailable`] and
/// [`SyncError::TransferInterrupted`] are retried; everything else drops the
/// task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Transfer interrupted: {0}")]
    TransferInterrupted(String),

    #[error("Retry budget exhausted after {0} retries")]
    RetryBudgetExhausted(u32),

    #[error("Invalid sync task: {0}")]
    InvalidTask(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::DestinationUnavailable(_) | SyncError::TransferInterrupted(_)
        )
    }
}
