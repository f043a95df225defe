//! Auth and User Routes
//!
//! - POST /api/auth/register - Create an account
//! - POST /api/auth/login - Open a session
//! - POST /api/auth/logout - Close the current session
//! - GET /api/auth/validate - Check the bearer token
//! - PUT /api/auth/update/:id - Update a profile
//! - POST /api/auth/unlock/:email - Unlock an account (manager)
//! - POST /api/auth/logout-all/:id - Close every session of a user
//! - GET /api/users - List users (manager)
//! - GET /api/users/me - Current user
//! - GET /api/users/:id - One user
//! - DELETE /api/users/:id - Delete a user (manager)

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth::{bearer_token, client_ip, user_agent, CurrentUser, ManagerUser};
use crate::api::dto::{CountResponse, LoginRequest, MessageResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::service::{LoginResponse, RegisterInput, UpdateUserInput};
use crate::storage::User;

/// POST /api/auth/register
///
/// Open registration creates citizens; a manager token may create any role.
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<RegisterInput>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let creator = match bearer_token(&headers) {
        Some(token) => Some(state.auth.validate(token)?.1),
        None => None,
    };
    let user = state.auth.register(input, creator.as_ref())?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let ip = client_ip(&headers);
    let agent = user_agent(&headers);
    let response = state
        .auth
        .login(&req.email, &req.password, ip.as_deref(), agent.as_deref())?;
    Ok(Json(response))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<MessageResponse>> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    state.auth.logout(token)?;
    Ok(Json(MessageResponse::new("Déconnexion réussie")))
}

/// GET /api/auth/validate
pub async fn validate(current: CurrentUser) -> Json<Value> {
    Json(json!({
        "valid": true,
        "user": current.user,
        "expires_at": current.session.expires_at,
    }))
}

/// PUT /api/auth/update/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<UpdateUserInput>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.auth.update_user(&current.user, id, input)?))
}

/// POST /api/auth/unlock/:email
pub async fn unlock(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(email): Path<String>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.auth.unlock(&manager, &email)?))
}

/// POST /api/auth/logout-all/:id
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<CountResponse>> {
    let count = state.auth.logout_all(&current.user, id)?;
    Ok(Json(CountResponse { count: count as u64 }))
}

/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.auth.list_users()?))
}

/// GET /api/users/me
pub async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

/// GET /api/users/:id
///
/// Users may read their own record; managers any record.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    if current.user.id != id && !current.user.is_manager() {
        return Err(ApiError::Forbidden("cannot read another user".into()));
    }
    Ok(Json(state.auth.get_user(id)?))
}

/// DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.auth.delete_user(&manager, id)?;
    Ok(StatusCode::NO_CONTENT)
}
