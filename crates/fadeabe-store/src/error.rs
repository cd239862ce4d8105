//! Error types for the store module.

use fadeabe_core::FailureKind;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The backing storage refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::Database(_) | StoreError::Unavailable(_) => FailureKind::TransientIo,
            StoreError::Serialization(_) | StoreError::InvalidData(_) => {
                FailureKind::MalformedInput
            }
            StoreError::Migration(_) => FailureKind::Fatal,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
