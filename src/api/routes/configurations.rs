//! Configuration and Budget Routes
//!
//! - GET /api/configurations - All settings
//! - GET, PUT /api/configurations/prix-par-m2 - Price per m²
//! - POST /api/configurations/calculer-budget - Budget estimate
//! - GET /api/configurations/by-key/:cle - Setting by key
//! - GET, PUT, DELETE /api/configurations/:id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::ManagerUser;
use crate::api::dto::{CalculerBudgetRequest, ConfigurationUpdateRequest, PrixRequest, PrixResponse};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::service::BudgetEstimate;
use crate::storage::Configuration;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Configuration>>> {
    Ok(Json(state.budget.list()?))
}

pub async fn get_prix(State(state): State<Arc<AppState>>) -> ApiResult<Json<PrixResponse>> {
    Ok(Json(PrixResponse {
        prix_par_m2: state.budget.prix_par_m2()?,
    }))
}

pub async fn set_prix(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Json(req): Json<PrixRequest>,
) -> ApiResult<Json<PrixResponse>> {
    state.budget.set_prix_par_m2(req.prix, &manager)?;
    Ok(Json(PrixResponse {
        prix_par_m2: state.budget.prix_par_m2()?,
    }))
}

/// POST /api/configurations/calculer-budget
pub async fn calculer_budget(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CalculerBudgetRequest>,
) -> ApiResult<Json<BudgetEstimate>> {
    Ok(Json(state.budget.calculer_budget(req.niveau, req.surface)?))
}

pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Json<Configuration>> {
    Ok(Json(state.budget.get(id)?))
}

pub async fn get_by_key(
    State(state): State<Arc<AppState>>,
    Path(cle): Path<String>,
) -> ApiResult<Json<Configuration>> {
    Ok(Json(state.budget.get_by_key(&cle)?))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Path(id): Path<i64>,
    Json(req): Json<ConfigurationUpdateRequest>,
) -> ApiResult<Json<Configuration>> {
    Ok(Json(state.budget.update(id, req.valeur, req.description, &manager)?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.budget.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
