//! Service error types
//!
//! Business-rule failures raised above the storage layer. The API maps
//! each variant to an HTTP status.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::{StorageError, Statut};

/// Errors that can occur while applying business rules
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Input rejected before touching the store
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness or state conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown email or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials {
        /// Attempts left before the account is locked (wrong password only)
        remaining_attempts: Option<u32>,
    },

    #[error("Account locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    /// The user already holds a valid session
    #[error("A session is already active for this account")]
    SessionAlreadyActive,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: Statut, to: Statut },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Photo hosting failed
    #[error("Upload error: {0}")]
    Upload(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ServiceError::NotFound(what),
            StorageError::Conflict(what) => ServiceError::Conflict(what),
            other => ServiceError::Storage(other),
        }
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Shorthand for a `NotFound` naming the missing record
pub(crate) fn not_found(kind: &str, id: impl std::fmt::Display) -> ServiceError {
    ServiceError::NotFound(format!("{} {}", kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_conflict_maps_to_conflict() {
        let err: ServiceError = StorageError::Conflict("UNIQUE constraint failed: users.email".into()).into();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let err: ServiceError = StorageError::Lock("poisoned".into()).into();
        assert!(matches!(err, ServiceError::Storage(_)));
    }

    #[test]
    fn test_transition_message() {
        let err = ServiceError::InvalidTransition {
            from: Statut::Termine,
            to: Statut::Nouveau,
        };
        assert_eq!(err.to_string(), "Invalid status transition from termine to nouveau");
    }
}
