//! Remote Synchronization
//!
//! Keeps the local database and the Firestore project used by the mobile
//! and web clients in step.
//!
//! ```text
//! service mutation ─► sync_queue (outbox) ─► SyncManager::push ─► RemoteStore
//!                                            SyncManager::pull ◄─ RemoteStore
//! ```
//!
//! - **document**: Firestore typed-value encoding and record mapping
//! - **client**: `RemoteStore` trait and the Firestore REST client
//! - **manager**: Push/pull runs, last-write-wins, background ticker

pub mod client;
pub mod document;
pub mod manager;

pub use client::{FirestoreClient, RemoteStore};
pub use document::RemoteDocument;
pub use manager::{SyncManager, SyncReport, SyncSettings, SyncState, SyncStatusReport};

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while talking to the remote store
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote store timed out")]
    Timeout,

    /// Connection refused or 5xx
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Remote API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Request error: {0}")]
    Request(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sync not configured: {0}")]
    NotConfigured(String),

    #[error("A sync run is already in progress")]
    InProgress,
}

impl SyncError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout | SyncError::Unavailable(_) | SyncError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_connect() {
            SyncError::Unavailable(err.to_string())
        } else {
            SyncError::Request(err.to_string())
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::RateLimited { retry_after: 2 }.is_retryable());
        assert!(SyncError::Unavailable("503".into()).is_retryable());
        assert!(!SyncError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!SyncError::Encoding("x".into()).is_retryable());
    }
}
