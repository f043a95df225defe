//! Photo Routes
//!
//! - POST /api/photos/signalement/:id - Attach a hosted photo by URL
//! - POST /api/photos/signalement/:id/upload - Upload raw image bytes
//! - GET /api/photos/signalement/:id - List in display order
//! - GET /api/photos/signalement/:id/principale - Main photo
//! - PUT /api/photos/signalement/:id/reorder - Reorder
//! - GET, DELETE /api/photos/:id
//! - PUT /api/photos/:id/principale - Make main photo

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{AddPhotoRequest, ReorderRequest, UploadParams};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::PhotoSignalement;

/// POST /api/photos/signalement/:id
pub async fn add(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(signalement_id): Path<i64>,
    Json(req): Json<AddPhotoRequest>,
) -> ApiResult<(StatusCode, Json<PhotoSignalement>)> {
    let photo = state.photos.add(
        signalement_id,
        &req.url,
        req.description.as_deref(),
        Some(&current.user),
    )?;
    Ok((StatusCode::CREATED, Json(photo)))
}

/// POST /api/photos/signalement/:id/upload
///
/// The body is the image itself; `Content-Type` names its format.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(signalement_id): Path<i64>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PhotoSignalement>)> {
    if body.is_empty() {
        return Err(ApiError::Validation("empty upload body".into()));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let photo = state
        .photos
        .upload(
            signalement_id,
            body.to_vec(),
            &content_type,
            params.description.as_deref(),
            Some(&current.user),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

/// GET /api/photos/signalement/:id
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(signalement_id): Path<i64>,
) -> ApiResult<Json<Vec<PhotoSignalement>>> {
    Ok(Json(state.photos.list(signalement_id)?))
}

/// GET /api/photos/signalement/:id/principale
pub async fn principale(
    State(state): State<Arc<AppState>>,
    Path(signalement_id): Path<i64>,
) -> ApiResult<Json<PhotoSignalement>> {
    Ok(Json(state.photos.principale(signalement_id)?))
}

/// PUT /api/photos/signalement/:id/reorder
pub async fn reorder(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
    Path(signalement_id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> ApiResult<Json<Vec<PhotoSignalement>>> {
    Ok(Json(state.photos.reorder(signalement_id, &req.photo_ids)?))
}

/// GET /api/photos/:id
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PhotoSignalement>> {
    Ok(Json(state.photos.get(id)?))
}

/// PUT /api/photos/:id/principale
pub async fn set_principale(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<PhotoSignalement>> {
    Ok(Json(state.photos.set_principale(id)?))
}

/// DELETE /api/photos/:id
pub async fn delete(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.photos.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
