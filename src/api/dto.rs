//! Data Transfer Objects
//!
//! Request and response types for the API endpoints that have no
//! counterpart in the service layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::ActionInput;
use crate::storage::NotificationType;

// ============================================
// AUTH DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================
// SIGNALEMENT DTOs
// ============================================

/// Query string of `GET /api/signalements`
#[derive(Debug, Default, Deserialize)]
pub struct SignalementListParams {
    pub status: Option<String>,
    pub user_id: Option<i64>,
    pub entreprise_id: Option<i64>,
    /// Free text on description or address
    #[serde(alias = "q")]
    pub search: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct LocationParams {
    pub lat: f64,
    pub lng: f64,
    pub radius: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    #[serde(alias = "statut")]
    pub status: String,
    #[serde(default)]
    pub commentaire: Option<String>,
}

/// Compact row for map markers
#[derive(Debug, Serialize)]
pub struct MapMarker {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub status: String,
    pub couleur: &'static str,
    pub description: String,
    pub date_signalement: DateTime<Utc>,
}

// ============================================
// PHOTO DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct AddPhotoRequest {
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    #[serde(alias = "ids")]
    pub photo_ids: Vec<i64>,
}

// ============================================
// ENTREPRISE DTOs
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct TopRatedParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SpecialiteParams {
    pub specialite: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub note: f64,
}

// ============================================
// ACTION DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct CreateActionRequest {
    pub signalement_id: i64,
    #[serde(flatten)]
    pub action: ActionInput,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub entreprise_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub date_fin_prevue: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FinishRequest {
    pub travaux_conformes: Option<bool>,
    pub commentaire_fin: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    pub budget: f64,
}

#[derive(Debug, Deserialize)]
pub struct UrlsRequest {
    pub urls: Vec<String>,
}

// ============================================
// CONFIGURATION DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct PrixRequest {
    #[serde(alias = "valeur", alias = "prix_par_m2")]
    pub prix: f64,
}

#[derive(Debug, Serialize)]
pub struct PrixResponse {
    pub prix_par_m2: f64,
}

#[derive(Debug, Deserialize)]
pub struct CalculerBudgetRequest {
    pub niveau: u8,
    pub surface: f64,
}

#[derive(Debug, Deserialize)]
pub struct ConfigurationUpdateRequest {
    pub valeur: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================
// NOTIFICATION DTOs
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct NotificationParams {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub user_id: i64,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub signalement_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub notification_type: Option<NotificationType>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
}

// ============================================
// EXPORT / IMPORT DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    /// csv, json or ndjson
    #[serde(default = "default_export_format")]
    pub format: String,
    pub status: Option<String>,
    /// RFC 3339, YYYY-MM-DD or relative (`now-7d`)
    pub since: Option<String>,
    pub until: Option<String>,
}

fn default_export_format() -> String {
    "json".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    #[serde(default)]
    pub dry_run: bool,
    /// Single-character field delimiter, `,` by default
    pub delimiter: Option<char>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy"
    pub status: String,
    /// Database status: "ok" or "error"
    pub database: String,
    /// Sync status: "disabled", "ok" or "error"
    pub sync: String,
    pub websocket_connections: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// API version
    pub version: String,
}
