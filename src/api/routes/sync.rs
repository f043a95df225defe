//! Sync Routes
//!
//! Manual control of the Firestore synchronization (manager only).
//!
//! - POST /api/sync/all - Push then pull
//! - POST /api/sync/push - Drain the outbox
//! - POST /api/sync/pull - Fetch remote changes
//! - GET /api/sync/status - Queue counts and last run

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::auth::ManagerUser;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::sync::{SyncManager, SyncReport, SyncStatusReport};

fn manager(state: &AppState) -> ApiResult<&Arc<SyncManager>> {
    state
        .sync
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("remote sync is not configured".to_string()))
}

/// POST /api/sync/all
pub async fn sync_all(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<SyncReport>> {
    let report = manager(&state)?.sync_all().await?;
    tracing::info!(
        pushed = report.pushed,
        pulled = report.pulled,
        conflicts = report.conflicts,
        duration_ms = report.duration_ms,
        "Manual sync completed"
    );
    Ok(Json(report))
}

/// POST /api/sync/push
pub async fn push(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<SyncReport>> {
    Ok(Json(manager(&state)?.push().await?))
}

/// POST /api/sync/pull
pub async fn pull(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<SyncReport>> {
    Ok(Json(manager(&state)?.pull().await?))
}

/// GET /api/sync/status
///
/// Still answers when sync is disabled so the outbox backlog stays visible.
pub async fn status(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
) -> ApiResult<Json<SyncStatusReport>> {
    if let Some(manager) = &state.sync {
        return Ok(Json(manager.status().await?));
    }

    let queue = state.store.sync_queue_counts()?;
    Ok(Json(SyncStatusReport {
        enabled: false,
        in_progress: false,
        interval_secs: state.config.sync.interval_secs,
        last_sync_at: None,
        last_report: None,
        last_error: None,
        pending: queue.pending + queue.processing,
        failed: queue.failed,
        queue,
    }))
}
