//! Signalement and History Routes
//!
//! - GET /api/signalements - List with filters
//! - POST /api/signalements - Report a road defect
//! - GET /api/signalements/map - Map markers
//! - GET /api/signalements/statistics - Totals and progress
//! - GET /api/signalements/status-options - Status labels and colours
//! - GET /api/signalements/location?lat&lng&radius - Proximity search
//! - GET /api/signalements/status/:code - By status
//! - GET, PUT, DELETE /api/signalements/:id
//! - PUT /api/signalements/:id/status - Change status
//! - GET /api/signalements/:id/history - Status history
//! - GET, DELETE /api/historiques/:id
//! - GET /api/historiques/signalement/:id[/dernier]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::str::FromStr;
use std::sync::Arc;

use super::export::parse_time;
use crate::api::auth::{CurrentUser, ManagerUser};
use crate::api::dto::{LocationParams, MapMarker, SignalementListParams, StatusChangeRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::service::{
    NearbySignalement, SignalementInput, SignalementStatistics, SignalementUpdate, StatusOption,
};
use crate::storage::{HistoriqueStatus, Signalement, SignalementFilter, Statut};

/// Page size when the caller gives none
const DEFAULT_LIMIT: usize = 500;

pub fn parse_status(code: &str) -> ApiResult<Statut> {
    Statut::from_str(code).map_err(ApiError::Validation)
}

pub fn filter_from_params(params: &SignalementListParams) -> ApiResult<SignalementFilter> {
    Ok(SignalementFilter {
        status: params.status.as_deref().map(parse_status).transpose()?,
        user_id: params.user_id,
        entreprise_id: params.entreprise_id,
        search: params
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        since: params.since.as_deref().map(parse_time).transpose()?,
        until: params.until.as_deref().map(parse_time).transpose()?,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIMIT)),
        offset: params.offset,
    })
}

/// GET /api/signalements
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SignalementListParams>,
) -> ApiResult<Json<Vec<Signalement>>> {
    let filter = filter_from_params(&params)?;
    Ok(Json(state.signalements.list(&filter)?))
}

/// POST /api/signalements
pub async fn create(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(input): Json<SignalementInput>,
) -> ApiResult<(StatusCode, Json<Signalement>)> {
    let created = state.signalements.create(Some(&current.user), input)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/signalements/:id
pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Json<Signalement>> {
    Ok(Json(state.signalements.get(id)?))
}

/// PUT /api/signalements/:id
pub async fn update(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<SignalementUpdate>,
) -> ApiResult<Json<Signalement>> {
    Ok(Json(state.signalements.update(&current.user, id, input)?))
}

/// DELETE /api/signalements/:id
pub async fn delete(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.signalements.delete(&current.user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/signalements/status/:code
pub async fn by_status(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> ApiResult<Json<Vec<Signalement>>> {
    let status = parse_status(&code)?;
    Ok(Json(state.signalements.list_by_status(status)?))
}

/// GET /api/signalements/map
pub async fn map(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<MapMarker>>> {
    let markers = state
        .signalements
        .list(&SignalementFilter::new())?
        .into_iter()
        .map(|s| MapMarker {
            id: s.id,
            latitude: s.latitude,
            longitude: s.longitude,
            status: s.status.to_string(),
            couleur: s.status.couleur(),
            description: s.description,
            date_signalement: s.date_signalement,
        })
        .collect();
    Ok(Json(markers))
}

/// GET /api/signalements/statistics
pub async fn statistics(State(state): State<Arc<AppState>>) -> ApiResult<Json<SignalementStatistics>> {
    Ok(Json(state.signalements.statistics()?))
}

/// GET /api/signalements/location
pub async fn by_location(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LocationParams>,
) -> ApiResult<Json<Vec<NearbySignalement>>> {
    Ok(Json(state.signalements.find_by_location(
        params.lat,
        params.lng,
        params.radius,
    )?))
}

/// PUT /api/signalements/:id/status
pub async fn change_status(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<StatusChangeRequest>,
) -> ApiResult<Json<Signalement>> {
    let status = parse_status(&req.status)?;
    Ok(Json(state.signalements.change_status(
        &current.user,
        id,
        status,
        req.commentaire.as_deref(),
    )?))
}

/// GET /api/signalements/status-options
pub async fn status_options(State(state): State<Arc<AppState>>) -> Json<Vec<StatusOption>> {
    Json(state.signalements.status_options())
}

/// GET /api/signalements/:id/history and /api/historiques/signalement/:id
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<HistoriqueStatus>>> {
    Ok(Json(state.signalements.history(id)?))
}

/// GET /api/historiques/signalement/:id/dernier
pub async fn latest_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<HistoriqueStatus>> {
    Ok(Json(state.signalements.latest_history(id)?))
}

/// GET /api/historiques/:id
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<HistoriqueStatus>> {
    Ok(Json(state.signalements.get_history(id)?))
}

/// DELETE /api/historiques/:id
pub async fn delete_history(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.signalements.delete_history(&manager, id)?;
    Ok(StatusCode::NO_CONTENT)
}
