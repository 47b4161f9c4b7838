//! Error types for the attendance store.

use std::path::PathBuf;

/// Storage layer errors.
///
/// Any of these on the sync path means the affected device's cursor
/// must not advance this cycle; the cycle continues for other devices.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded back into a punch.
    #[error("corrupt record: {detail}")]
    CorruptRecord {
        /// What failed to decode.
        detail: String,
    },

    /// Database path is not valid UTF-8.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
    },
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
