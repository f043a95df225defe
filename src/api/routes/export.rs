//! Export Routes
//!
//! Signalement export for backup and analysis.
//!
//! - GET /api/export/signalements?format=csv|json|ndjson&status=&since=&until=

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

use super::signalements::parse_status;
use crate::api::auth::ManagerUser;
use crate::api::dto::ExportParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::{Signalement, SignalementFilter};

static RELATIVE_TIME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^now-(\d+)([hdwm])$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Csv,
    Json,
    Ndjson,
}

impl ExportFormat {
    fn parse(s: &str) -> ApiResult<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "ndjson" | "jsonl" => Ok(ExportFormat::Ndjson),
            other => Err(ApiError::Validation(format!("Unknown export format: {}", other))),
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Ndjson => "application/x-ndjson",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Ndjson => "ndjson",
        }
    }
}

/// GET /api/export/signalements
pub async fn export_signalements(
    State(state): State<Arc<AppState>>,
    _manager: ManagerUser,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    let format = ExportFormat::parse(&params.format)?;

    let since = params.since.as_deref().map(parse_time).transpose()?;
    let until = params.until.as_deref().map(parse_time).transpose()?;
    if let (Some(s), Some(u)) = (since, until) {
        if s >= u {
            return Err(ApiError::Validation("since must be before until".to_string()));
        }
    }

    let mut filter = SignalementFilter::new().between(since, until);
    if let Some(code) = params.status.as_deref() {
        filter = filter.status(parse_status(code)?);
    }
    let signalements = state.signalements.list(&filter)?;

    let body = match format {
        ExportFormat::Csv => format_csv(&signalements)?,
        ExportFormat::Json => format_json(&signalements)?,
        ExportFormat::Ndjson => format_ndjson(&signalements)?,
    };

    let filename = format!(
        "signalements_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    tracing::info!(rows = signalements.len(), format = format.extension(), "Signalements exported");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from(body),
    )
        .into_response())
}

/// Parse a query-string time: `now`, `now-<n><h|d|w|m>`, RFC 3339 or `YYYY-MM-DD`
pub fn parse_time(s: &str) -> ApiResult<DateTime<Utc>> {
    let s = s.trim();
    if s.starts_with("now") {
        let now = Utc::now();
        if s == "now" {
            return Ok(now);
        }

        let re = RELATIVE_TIME
            .as_ref()
            .ok_or_else(|| ApiError::Internal("Regex error".to_string()))?;
        let caps = re
            .captures(s)
            .ok_or_else(|| ApiError::Validation(format!("Cannot parse time: {}", s)))?;
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| ApiError::Validation("Invalid number".to_string()))?;
        let offset = match &caps[2] {
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            "w" => Duration::weeks(amount),
            "m" => Duration::days(amount * 30),
            _ => return Err(ApiError::Validation("Invalid time unit".to_string())),
        };
        return Ok(now - offset);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc());
    }

    Err(ApiError::Validation(format!("Cannot parse timestamp: {}", s)))
}

/// One CSV line; columns match what the CSV importer reads back
#[derive(Serialize)]
struct CsvRow<'a> {
    id: i64,
    latitude: f64,
    longitude: f64,
    adresse: &'a str,
    description: &'a str,
    status: &'a str,
    niveau: Option<u8>,
    surface: Option<f64>,
    budget: Option<f64>,
    entreprise_id: Option<i64>,
    user_id: Option<i64>,
    date_signalement: String,
}

fn format_csv(signalements: &[Signalement]) -> ApiResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for s in signalements {
        writer
            .serialize(CsvRow {
                id: s.id,
                latitude: s.latitude,
                longitude: s.longitude,
                adresse: s.adresse.as_deref().unwrap_or(""),
                description: &s.description,
                status: s.status.as_str(),
                niveau: s.niveau,
                surface: s.surface,
                budget: s.budget,
                entreprise_id: s.entreprise_id,
                user_id: s.user_id,
                date_signalement: s.date_signalement.to_rfc3339(),
            })
            .map_err(|e| ApiError::Internal(format!("CSV encoding failed: {}", e)))?;
    }
    writer
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("CSV encoding failed: {}", e)))
}

fn format_json(signalements: &[Signalement]) -> ApiResult<Vec<u8>> {
    serde_json::to_vec_pretty(signalements)
        .map_err(|e| ApiError::Internal(format!("JSON encoding failed: {}", e)))
}

fn format_ndjson(signalements: &[Signalement]) -> ApiResult<Vec<u8>> {
    let mut out = Vec::new();
    for s in signalements {
        serde_json::to_writer(&mut out, s)
            .map_err(|e| ApiError::Internal(format!("JSON encoding failed: {}", e)))?;
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing;
    use crate::storage::Store;

    #[test]
    fn test_parse_relative_time() {
        let before = Utc::now();
        let t = parse_time("now-7d").unwrap();
        let expected = before - Duration::days(7);
        assert!((t - expected).num_seconds().abs() <= 1);

        let t = parse_time("now-2h").unwrap();
        assert!((Utc::now() - t).num_minutes() >= 119);
    }

    #[test]
    fn test_parse_absolute_time() {
        let t = parse_time("2024-03-01").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let t = parse_time("2024-03-01T10:30:00+03:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T07:30:00+00:00");
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("now-7y").is_err());
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("jsonl").unwrap(), ExportFormat::Ndjson);
        assert!(ExportFormat::parse("xml").is_err());
    }

    #[test]
    fn test_format_csv_header_and_rows() {
        let store = Store::open_in_memory().unwrap();
        let s = testing::signalement(&store, None);

        let bytes = format_csv(&[s.clone()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,latitude,longitude,adresse,description,status,niveau,surface,budget,entreprise_id,user_id,date_signalement"
        );
        assert!(lines.next().unwrap().starts_with(&format!("{},", s.id)));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_format_ndjson_one_line_per_row() {
        let store = Store::open_in_memory().unwrap();
        let a = testing::signalement(&store, None);
        let b = testing::signalement(&store, None);

        let text = String::from_utf8(format_ndjson(&[a, b]).unwrap()).unwrap();
        assert_eq!(text.lines().count(), 2);
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["id"].is_i64());
        }
    }
}
