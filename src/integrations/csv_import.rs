//! CSV Import
//!
//! Bulk import of signalements from a CSV file with a header row.
//!
//! Required columns: `latitude`, `longitude`, `description`.
//! Optional columns: `adresse`, `surface`, `niveau`, `budget`, `status`,
//! `date_signalement`. Header matching is case-insensitive and accepts a
//! few aliases (`lat`, `lng`, `address`, ...).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use super::IntegrationError;
use crate::service::budget::{NIVEAU_MAX, NIVEAU_MIN};
use crate::service::geo::valid_coordinates;
use crate::service::{SignalementInput, SignalementService};
use crate::storage::{Statut, User};

/// Rejected lines kept in the report; the count stays exact
const MAX_REPORTED_REJECTS: usize = 100;

const IMPORT_COMMENT: &str = "Import CSV";

/// CSV importer for signalements
pub struct CsvImporter {
    delimiter: u8,
    dry_run: bool,
}

/// A line that could not be imported
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectedRow {
    /// 1-based line number in the file, header included
    pub line: usize,
    pub reason: String,
}

/// Result of a CSV import operation
#[derive(Debug, Default, Serialize)]
pub struct CsvImportResult {
    pub dry_run: bool,
    pub rows_processed: usize,
    /// Rows that passed validation (and were written, unless dry-run)
    pub rows_imported: usize,
    pub rows_rejected: usize,
    /// Ids of the created signalements (empty on dry-run)
    pub imported_ids: Vec<i64>,
    pub rejected: Vec<RejectedRow>,
}

impl CsvImportResult {
    fn reject(&mut self, line: usize, reason: impl Into<String>) {
        self.rows_rejected += 1;
        if self.rejected.len() < MAX_REPORTED_REJECTS {
            self.rejected.push(RejectedRow {
                line,
                reason: reason.into(),
            });
        }
    }
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Column positions resolved from the header row
#[derive(Debug)]
struct Columns {
    latitude: usize,
    longitude: usize,
    description: usize,
    adresse: Option<usize>,
    surface: Option<usize>,
    niveau: Option<usize>,
    budget: Option<usize>,
    status: Option<usize>,
    date: Option<usize>,
}

impl Columns {
    fn detect(headers: &csv::StringRecord) -> Result<Self, IntegrationError> {
        let find = |names: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim().to_lowercase();
                names.iter().any(|n| *n == h)
            })
        };
        let required = |names: &[&str]| {
            find(names).ok_or_else(|| {
                IntegrationError::ParseError(format!("missing required column: {}", names[0]))
            })
        };

        Ok(Self {
            latitude: required(&["latitude", "lat"])?,
            longitude: required(&["longitude", "lng", "lon"])?,
            description: required(&["description"])?,
            adresse: find(&["adresse", "address"]),
            surface: find(&["surface", "surface_m2"]),
            niveau: find(&["niveau", "level"]),
            budget: find(&["budget"]),
            status: find(&["status", "statut"]),
            date: find(&["date_signalement", "date"]),
        })
    }
}

/// One validated line
#[derive(Debug)]
struct ParsedRow {
    input: SignalementInput,
    status: Option<Statut>,
}

impl CsvImporter {
    /// Create a new CSV importer with default settings
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            dry_run: false,
        }
    }

    /// Set the field delimiter (`;` is common in French spreadsheets)
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Validate every row without writing anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Import signalements from a CSV file
    pub fn import(
        &self,
        path: &Path,
        service: &SignalementService,
        by: &User,
    ) -> Result<CsvImportResult, IntegrationError> {
        let file = std::fs::File::open(path)?;
        let result = self.import_reader(file, service, by)?;
        tracing::info!(
            path = ?path,
            imported = result.rows_imported,
            rejected = result.rows_rejected,
            dry_run = result.dry_run,
            "CSV import finished"
        );
        Ok(result)
    }

    /// Import from a CSV string
    pub fn import_str(
        &self,
        csv_data: &str,
        service: &SignalementService,
        by: &User,
    ) -> Result<CsvImportResult, IntegrationError> {
        self.import_reader(csv_data.as_bytes(), service, by)
    }

    fn import_reader<R: Read>(
        &self,
        reader: R,
        service: &SignalementService,
        by: &User,
    ) -> Result<CsvImportResult, IntegrationError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = Columns::detect(reader.headers()?)?;
        let mut result = CsvImportResult {
            dry_run: self.dry_run,
            ..Default::default()
        };

        for (idx, record) in reader.records().enumerate() {
            result.rows_processed += 1;
            // quoted fields may span lines, so take the reader's position
            let fallback = idx + 2;

            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    let line = e.position().map_or(fallback, |p| p.line() as usize);
                    result.reject(line, e.to_string());
                    continue;
                }
            };
            let line = record.position().map_or(fallback, |p| p.line() as usize);

            let row = match parse_row(&columns, &record) {
                Ok(row) => row,
                Err(reason) => {
                    result.reject(line, reason);
                    continue;
                }
            };

            if self.dry_run {
                result.rows_imported += 1;
                continue;
            }

            match apply_row(row, service, by) {
                Ok(id) => {
                    result.rows_imported += 1;
                    result.imported_ids.push(id);
                }
                Err(e) => {
                    tracing::debug!(line, error = %e, "CSV row rejected by service");
                    result.reject(line, e.to_string());
                }
            }
        }

        Ok(result)
    }
}

fn apply_row(row: ParsedRow, service: &SignalementService, by: &User) -> Result<i64, IntegrationError> {
    let created = service.create(Some(by), row.input)?;
    if let Some(status) = row.status.filter(|s| *s != created.status) {
        service.change_status(by, created.id, status, Some(IMPORT_COMMENT))?;
    }
    Ok(created.id)
}

fn parse_row(columns: &Columns, record: &csv::StringRecord) -> Result<ParsedRow, String> {
    let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).filter(|v| !v.is_empty());

    let latitude: f64 = parse_number("latitude", field(Some(columns.latitude)))?
        .ok_or("latitude is required")?;
    let longitude: f64 = parse_number("longitude", field(Some(columns.longitude)))?
        .ok_or("longitude is required")?;
    if !valid_coordinates(latitude, longitude) {
        return Err(format!("invalid coordinates ({}, {})", latitude, longitude));
    }

    let description = field(Some(columns.description))
        .ok_or("description is required")?
        .to_string();

    let niveau: Option<u8> = parse_number("niveau", field(columns.niveau))?;
    if let Some(n) = niveau {
        if !(NIVEAU_MIN..=NIVEAU_MAX).contains(&n) {
            return Err(format!("niveau must be between {} and {}", NIVEAU_MIN, NIVEAU_MAX));
        }
    }
    let surface: Option<f64> = parse_number("surface", field(columns.surface))?;
    if surface.map(|s| s <= 0.0).unwrap_or(false) {
        return Err("surface must be greater than 0".into());
    }
    let budget: Option<f64> = parse_number("budget", field(columns.budget))?;
    if budget.map(|b| b < 0.0).unwrap_or(false) {
        return Err("budget cannot be negative".into());
    }

    let status = field(columns.status).map(Statut::from_str).transpose()?;
    let date_signalement = field(columns.date)
        .map(|raw| parse_timestamp(raw).ok_or_else(|| format!("could not parse date: {}", raw)))
        .transpose()?;

    Ok(ParsedRow {
        input: SignalementInput {
            latitude,
            longitude,
            adresse: field(columns.adresse).map(str::to_string),
            description,
            budget,
            niveau,
            surface,
            entreprise_id: None,
            date_signalement,
        },
        status,
    })
}

fn parse_number<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, String> {
    raw.map(|v| {
        // decimal comma from French locales
        v.replace(',', ".")
            .parse::<T>()
            .map_err(|_| format!("invalid {}: {}", name, v))
    })
    .transpose()
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a bare date (noon UTC)
fn parse_timestamp(ts_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let datetime_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"];
    for fmt in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(ts_str, fmt) {
            return Some(dt.and_utc());
        }
    }

    let date_formats = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];
    for fmt in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(ts_str, fmt) {
            return date.and_hms_opt(12, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::manager;
    use crate::service::{BudgetService, Notifier};
    use crate::storage::{SignalementFilter, Store};

    fn service(store: &Store) -> SignalementService {
        SignalementService::new(
            store.clone(),
            BudgetService::new(store.clone(), 10_000.0),
            Notifier::new(store.clone(), None),
        )
    }

    #[test]
    fn test_import_with_rejects() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);

        let csv_data = "Latitude,Longitude,Description,Adresse,Niveau,Surface,Status
-18.8792,47.5079,Nid de poule,Analakely,2,10,
-18.91,47.52,Affaissement,,,,en cours
95.0,47.5,Hors limites,,,,
-18.9,47.5,,,,,
-18.9,abc,Texte,,,,";

        let result = CsvImporter::new().import_str(csv_data, &svc, &boss).unwrap();

        assert_eq!(result.rows_processed, 5);
        assert_eq!(result.rows_imported, 2);
        assert_eq!(result.rows_rejected, 3);
        let lines: Vec<usize> = result.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![4, 5, 6]);

        let first = svc.get(result.imported_ids[0]).unwrap();
        assert_eq!(first.budget, Some(200_000.0));
        assert_eq!(first.adresse.as_deref(), Some("Analakely"));

        let second = svc.get(result.imported_ids[1]).unwrap();
        assert_eq!(second.status, Statut::EnCours);
        assert_eq!(svc.history(second.id).unwrap().len(), 2);
    }

    #[test]
    fn test_reject_lines_follow_multiline_fields() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);

        let csv_data = "latitude,longitude,description
-18.8792,47.5079,\"Nid de poule
profond
sur deux voies\"
95.0,47.5,Hors limites
";

        let result = CsvImporter::new().import_str(csv_data, &svc, &boss).unwrap();

        assert_eq!(result.rows_imported, 1);
        let lines: Vec<usize> = result.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![5]);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);

        let csv_data = "lat;lng;description;surface\n-18.87;47.50;Fissure;12,5\n";
        let result = CsvImporter::new()
            .with_delimiter(b';')
            .dry_run(true)
            .import_str(csv_data, &svc, &boss)
            .unwrap();

        assert!(result.dry_run);
        assert_eq!(result.rows_imported, 1);
        assert!(result.imported_ids.is_empty());
        assert!(svc.list(&SignalementFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_required_column() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);

        let result = CsvImporter::new().import_str("latitude,description\n1,x\n", &svc, &boss);
        assert!(matches!(result, Err(IntegrationError::ParseError(_))));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T08:30:00Z").is_some());
        assert!(parse_timestamp("2024-03-01 08:30:00").is_some());
        assert_eq!(
            parse_timestamp("01/03/2024").map(|d| d.to_rfc3339()),
            Some("2024-03-01T12:00:00+00:00".to_string())
        );
        assert!(parse_timestamp("yesterday").is_none());
    }
}
