//! Import Routes
//!
//! - POST /api/import/signalements?dry_run=&delimiter= - CSV body (manager)

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::auth::ManagerUser;
use crate::api::dto::ImportParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::integrations::{CsvImportResult, CsvImporter};

/// POST /api/import/signalements
pub async fn import_signalements(
    State(state): State<Arc<AppState>>,
    ManagerUser(manager): ManagerUser,
    Query(params): Query<ImportParams>,
    body: String,
) -> ApiResult<Json<CsvImportResult>> {
    if body.trim().is_empty() {
        return Err(ApiError::Validation("empty CSV body".to_string()));
    }

    let mut importer = CsvImporter::new().dry_run(params.dry_run);
    if let Some(delimiter) = params.delimiter {
        if !delimiter.is_ascii() {
            return Err(ApiError::Validation(format!("unsupported delimiter: {}", delimiter)));
        }
        importer = importer.with_delimiter(delimiter as u8);
    }

    let result = importer.import_str(&body, &state.signalements, &manager)?;
    Ok(Json(result))
}
