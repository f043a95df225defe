//! Works Routes
//!
//! Reads are public; every mutation needs the manager role.
//!
//! - POST /api/actions - Open a works record on a signalement
//! - GET /api/actions/en-cours, /api/actions/en-retard, /api/actions/statistics
//! - GET /api/actions/signalement/:id, /api/actions/entreprise/:id
//! - GET, PUT, DELETE /api/actions/:id
//! - POST /api/actions/:id/assigner-entreprise - Assign a contractor
//! - POST /api/actions/:id/demarrer, /api/actions/:id/terminer
//! - PUT /api/actions/:id/budget
//! - POST /api/actions/:id/photos-avant, /api/actions/:id/photos-apres

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::ManagerUser;
use crate::api::dto::{
    AssignRequest, BudgetRequest, CreateActionRequest, FinishRequest, StartRequest, UrlsRequest,
};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::service::{ActionInput, ActionStatistics};
use crate::storage::SignalementAction;

pub async fn create(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Json(req): Json<CreateActionRequest>,
) -> ApiResult<(StatusCode, Json<SignalementAction>)> {
    let action = state.works.create(req.signalement_id, req.action, &manager)?;
    Ok((StatusCode::CREATED, Json(action)))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SignalementAction>> {
    Ok(Json(state.works.get(id)?))
}

pub async fn for_signalement(
    State(state): State<Arc<AppState>>,
    Path(signalement_id): Path<i64>,
) -> ApiResult<Json<Vec<SignalementAction>>> {
    Ok(Json(state.works.list_for_signalement(signalement_id)?))
}

pub async fn for_entreprise(
    State(state): State<Arc<AppState>>,
    Path(entreprise_id): Path<i64>,
) -> ApiResult<Json<Vec<SignalementAction>>> {
    Ok(Json(state.works.list_for_entreprise(entreprise_id)?))
}

pub async fn en_cours(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<SignalementAction>>> {
    Ok(Json(state.works.en_cours()?))
}

pub async fn en_retard(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<SignalementAction>>> {
    Ok(Json(state.works.en_retard()?))
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> ApiResult<Json<ActionStatistics>> {
    Ok(Json(state.works.statistics()?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    Json(input): Json<ActionInput>,
) -> ApiResult<Json<SignalementAction>> {
    Ok(Json(state.works.update(id, input, &manager)?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.works.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/actions/:id/assigner-entreprise
pub async fn assign(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<SignalementAction>> {
    Ok(Json(state.works.assign_entreprise(id, req.entreprise_id, &manager)?))
}

/// POST /api/actions/:id/demarrer
///
/// The body is optional; `{}` keeps the planned end date.
pub async fn start(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    body: Option<Json<StartRequest>>,
) -> ApiResult<Json<SignalementAction>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.works.start(id, req.date_fin_prevue, &manager)?))
}

/// POST /api/actions/:id/terminer
pub async fn finish(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    body: Option<Json<FinishRequest>>,
) -> ApiResult<Json<SignalementAction>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.works.finish(
        id,
        req.travaux_conformes,
        req.commentaire_fin,
        &manager,
    )?))
}

/// PUT /api/actions/:id/budget
pub async fn update_budget(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    Json(req): Json<BudgetRequest>,
) -> ApiResult<Json<SignalementAction>> {
    Ok(Json(state.works.update_budget(id, req.budget, &manager)?))
}

pub async fn photos_avant(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    Json(req): Json<UrlsRequest>,
) -> ApiResult<Json<SignalementAction>> {
    Ok(Json(state.works.add_photos_avant(id, req.urls, &manager)?))
}

pub async fn photos_apres(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    Json(req): Json<UrlsRequest>,
) -> ApiResult<Json<SignalementAction>> {
    Ok(Json(state.works.add_photos_apres(id, req.urls, &manager)?))
}
