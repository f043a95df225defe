//! API Error Types
//!
//! Every handler error becomes a JSON body
//! `{"error": {"code", "message", "timestamp"}, "request_id"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::integrations::IntegrationError;
use crate::service::ServiceError;
use crate::sync::SyncError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, unknown or expired session, or bad credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Account locked after too many failed logins
    #[error("Account locked until {until}")]
    Locked { until: DateTime<Utc> },

    /// An upstream service (Firestore, Cloudinary) failed
    #[error("Upstream error: {0}")]
    BadGateway(String),

    /// Service unavailable (dependency down or not configured)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Locked { .. } => (StatusCode::LOCKED, "ACCOUNT_LOCKED"),
            ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        // Log the error
        tracing::error!(
            request_id = %request_id,
            error_code = %code,
            error_message = %self,
            "API error occurred"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
                timestamp: Utc::now(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => ApiError::Validation(msg),
            ServiceError::NotFound(msg) => ApiError::NotFound(msg),
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::InvalidCredentials {
                remaining_attempts: Some(n),
            } => ApiError::Unauthorized(format!(
                "invalid credentials, {} attempt(s) remaining",
                n
            )),
            ServiceError::InvalidCredentials { .. } => {
                ApiError::Unauthorized("invalid credentials".into())
            }
            ServiceError::AccountLocked { until } => ApiError::Locked { until },
            e @ ServiceError::SessionAlreadyActive => ApiError::Conflict(e.to_string()),
            ServiceError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            ServiceError::Forbidden(msg) => ApiError::Forbidden(msg),
            e @ ServiceError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            ServiceError::Storage(e) => ApiError::Storage(e),
            ServiceError::Upload(msg) => ApiError::BadGateway(msg),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotConfigured(msg) => ApiError::ServiceUnavailable(msg),
            e @ SyncError::InProgress => ApiError::Conflict(e.to_string()),
            SyncError::Storage(e) => ApiError::Storage(e),
            SyncError::Encoding(msg) => ApiError::Internal(msg),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

impl From<IntegrationError> for ApiError {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::NotConfigured(msg) => ApiError::ServiceUnavailable(msg),
            IntegrationError::InvalidInput(msg) | IntegrationError::ParseError(msg) => {
                ApiError::Validation(msg)
            }
            IntegrationError::Csv(e) => ApiError::Validation(e.to_string()),
            IntegrationError::Io(e) => ApiError::Io(e),
            IntegrationError::Storage(e) => ApiError::Storage(e),
            IntegrationError::Service(e) => e.into(),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Statut;

    #[test]
    fn test_service_errors_map_to_status_codes() {
        let cases = [
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::InvalidCredentials {
                    remaining_attempts: Some(2),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (ServiceError::AccountLocked { until: Utc::now() }, StatusCode::LOCKED),
            (ServiceError::SessionAlreadyActive, StatusCode::CONFLICT),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                ServiceError::InvalidTransition {
                    from: Statut::Termine,
                    to: Statut::Nouveau,
                },
                StatusCode::CONFLICT,
            ),
            (ServiceError::Upload("down".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_and_code().0, expected, "{}", api);
        }
    }

    #[test]
    fn test_sync_errors_map_to_status_codes() {
        let api: ApiError = SyncError::NotConfigured("off".into()).into();
        assert_eq!(api.status_and_code().0, StatusCode::SERVICE_UNAVAILABLE);

        let api: ApiError = SyncError::Timeout.into();
        assert_eq!(api.status_and_code().0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_remaining_attempts_in_message() {
        let api: ApiError = ServiceError::InvalidCredentials {
            remaining_attempts: Some(1),
        }
        .into();
        assert!(api.to_string().contains("1 attempt(s) remaining"));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::NotFound("signalement 9".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert!(body["error"]["timestamp"].as_str().is_some());
        assert!(body["request_id"].as_str().is_some());
    }
}
