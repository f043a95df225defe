//! Manager Dashboard Routes
//!
//! - GET /api/manager/dashboard/statistics - Counts per status, KPIs, budget per entreprise
//! - GET /api/manager/dashboard/signalements - Filtered listing
//! - GET /api/manager/dashboard/budget-summary - Budget consumption
//! - GET /api/manager/dashboard/performance - Resolution delays and works backlog

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use super::signalements::filter_from_params;
use crate::api::auth::ManagerUser;
use crate::api::dto::SignalementListParams;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::service::{BudgetSummary, DashboardStatistics, Performance};
use crate::storage::Signalement;

pub async fn statistics(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<DashboardStatistics>> {
    Ok(Json(state.dashboard.statistics()?))
}

pub async fn signalements(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Query(params): Query<SignalementListParams>,
) -> ApiResult<Json<Vec<Signalement>>> {
    let filter = filter_from_params(&params)?;
    Ok(Json(state.dashboard.signalements(&filter)?))
}

pub async fn budget(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<BudgetSummary>> {
    Ok(Json(state.dashboard.budget_summary()?))
}

pub async fn performance(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<Performance>> {
    Ok(Json(state.dashboard.performance()?))
}
