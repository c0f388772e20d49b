//! Error types for storage operations

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors a snapshot store can report
///
/// The in-memory store never produces any of these. They exist for backends
/// that sit on fallible storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend refused or failed the write
    #[error("storage write failed: {0}")]
    WriteFailed(String),

    /// The backend failed to answer a lookup
    #[error("storage read failed: {0}")]
    ReadFailed(String),

    /// The backend is not healthy
    #[error("storage backend unhealthy: {0}")]
    UnhealthyBackend(String),
}
