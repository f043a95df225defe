//! Notification Routes
//!
//! Each user only sees and edits their own notifications.
//!
//! - GET /api/notifications?unread=true
//! - GET /api/notifications/unread-count
//! - PUT /api/notifications/:id/read
//! - PUT /api/notifications/read-all
//! - DELETE /api/notifications/:id
//! - POST /api/notifications/send - Direct message (manager)
//! - POST /api/notifications/broadcast - Message every user (manager)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::{CurrentUser, ManagerUser};
use crate::api::dto::{
    BroadcastRequest, CountResponse, NotificationParams, SendNotificationRequest,
};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::storage::{NewNotification, Notification, NotificationType};

pub async fn list(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(params): Query<NotificationParams>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.notifier.list(&current.user, params.unread)?))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> ApiResult<Json<CountResponse>> {
    Ok(Json(CountResponse {
        count: state.notifier.unread_count(&current.user)?,
    }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.notifier.mark_read(&current.user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> ApiResult<Json<CountResponse>> {
    let count = state.notifier.mark_all_read(&current.user)?;
    Ok(Json(CountResponse { count: count as u64 }))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.notifier.delete(&current.user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/notifications/send
pub async fn send(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Json(req): Json<SendNotificationRequest>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    let kind = req.notification_type.unwrap_or(NotificationType::Info);
    let mut new = NewNotification::new(req.user_id, kind, req.title, req.message);
    if let Some(id) = req.signalement_id {
        new = new.signalement(id);
    }
    let notification = state.notifier.send(new)?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// POST /api/notifications/broadcast
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<Json<CountResponse>> {
    let count = state.notifier.broadcast(&req.title, &req.message)?;
    Ok(Json(CountResponse { count: count as u64 }))
}
