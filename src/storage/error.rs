//! Storage error types
//!
//! Defines all errors that can occur in the persistence layer.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur in the SQLite store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed (creating the data directory, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite returned an error
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),

    /// A row that was expected to exist is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique or foreign-key constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection mutex was poisoned
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(
                    msg.clone()
                        .unwrap_or_else(|| "constraint violation".to_string()),
                )
            }
            _ => StorageError::Sqlite(err),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
