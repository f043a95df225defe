//! Entreprise Routes
//!
//! Reads are public; every mutation needs the manager role.
//!
//! - GET, POST /api/entreprises
//! - GET /api/entreprises/active
//! - GET /api/entreprises/top-rated?limit=
//! - GET /api/entreprises/by-specialite?specialite=
//! - GET, PUT, DELETE /api/entreprises/:id
//! - POST /api/entreprises/:id/activate
//! - POST /api/entreprises/:id/deactivate
//! - POST /api/entreprises/:id/update-note

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::ManagerUser;
use crate::api::dto::{NoteRequest, SpecialiteParams, TopRatedParams};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::service::{EntrepriseInput, EntrepriseUpdate};
use crate::storage::Entreprise;

const DEFAULT_TOP_RATED: usize = 5;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Entreprise>>> {
    Ok(Json(state.entreprises.list()?))
}

pub async fn active(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Entreprise>>> {
    Ok(Json(state.entreprises.active()?))
}

pub async fn top_rated(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopRatedParams>,
) -> ApiResult<Json<Vec<Entreprise>>> {
    let limit = params.limit.unwrap_or(DEFAULT_TOP_RATED);
    Ok(Json(state.entreprises.top_rated(limit)?))
}

pub async fn by_specialite(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SpecialiteParams>,
) -> ApiResult<Json<Vec<Entreprise>>> {
    Ok(Json(state.entreprises.by_specialite(&params.specialite)?))
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Json<Entreprise>> {
    Ok(Json(state.entreprises.get(id)?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Json(input): Json<EntrepriseInput>,
) -> ApiResult<(StatusCode, Json<Entreprise>)> {
    let entreprise = state.entreprises.create(input, &manager)?;
    Ok((StatusCode::CREATED, Json(entreprise)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
    Json(input): Json<EntrepriseUpdate>,
) -> ApiResult<Json<Entreprise>> {
    Ok(Json(state.entreprises.update(id, input)?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.entreprises.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Entreprise>> {
    Ok(Json(state.entreprises.activate(id)?))
}

pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Entreprise>> {
    Ok(Json(state.entreprises.deactivate(id)?))
}

/// POST /api/entreprises/:id/update-note
pub async fn update_note(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
    Json(req): Json<NoteRequest>,
) -> ApiResult<Json<Entreprise>> {
    Ok(Json(state.entreprises.update_note(id, req.note)?))
}
