//! Voirie Storage
//!
//! SQLite persistence for every record of the platform:
//!
//! - **types**: Core records (Signalement, User, Entreprise, ...)
//! - **schema**: Table definitions and reference data
//! - **error**: Error types
//! - one module per table family (`users`, `signalements`, `photos`, ...),
//!   each adding methods to [`Store`]
//!
//! # Architecture
//!
//! ```text
//! handler → service → Store (Mutex<Connection>) → SQLite file (WAL)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use voirie::storage::{NewSignalement, Store, StoreConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open(&StoreConfig::new("./data/voirie.db"))?;
//!
//!     let signalement = store.insert_signalement(&NewSignalement {
//!         latitude: -18.8792,
//!         longitude: 47.5079,
//!         description: "Nid de poule avenue de l'Indépendance".to_string(),
//!         ..Default::default()
//!     }, None)?;
//!
//!     println!("Created signalement {}", signalement.id);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod entreprises;
pub mod error;
pub mod notifications;
pub mod photos;
pub mod schema;
pub mod settings;
pub mod signalements;
pub mod sync_queue;
pub mod types;
pub mod users;

pub use error::{StorageError, StorageResult};
pub use sync_queue::QueueCounts;
pub use types::{
    Configuration, Entreprise, EntityType, HistoriqueStatus, LoginAttempt, LoginFailure,
    NewAction, NewEntreprise, NewNotification, NewSignalement, NewUser, Notification,
    NotificationType, PhotoSignalement, QueueStatus, Role, Session, Signalement,
    SignalementAction, SignalementFilter, Statut, SyncAction, SyncDirection, SyncHistory,
    SyncQueueEntry, User,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the SQLite database file
    pub path: PathBuf,
    /// How long a writer waits on a locked database (ms)
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 5000,
        }
    }
}

/// Handle to the SQLite database
///
/// Cheap to clone. All access is serialized through one connection
/// (std::sync::Mutex because rusqlite's Connection is !Sync); the lock is
/// only held for the duration of a single call.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database file and apply the schema
    pub fn open(config: &StoreConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;

        schema::migrate(&conn)?;

        tracing::info!(path = ?config.path, "Opened database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(config.path.clone()),
        })
    }

    /// In-memory database, used by tests and benches
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file path (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lightweight liveness check
    pub fn ping(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }
}

// ============================================
// Column helpers shared by the table modules
// ============================================

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn fmt_opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(fmt_ts)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

pub(crate) fn get_string_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn string_list(values: &[String]) -> StorageResult<String> {
    Ok(serde_json::to_string(values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("voirie.db");

        let store = Store::open(&StoreConfig::new(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
        store.ping().unwrap();
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("voirie.db"));

        {
            let store = Store::open(&config).unwrap();
            store
                .insert_signalement(
                    &NewSignalement {
                        latitude: -18.9,
                        longitude: 47.5,
                        description: "Fissure".to_string(),
                        ..Default::default()
                    },
                    None,
                )
                .unwrap();
        }

        let store = Store::open(&config).unwrap();
        assert_eq!(store.count_signalements().unwrap(), 1);
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let a = DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2024-01-01T10:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);

        assert!(fmt_ts(&a) < fmt_ts(&b));
        assert_eq!(fmt_ts(&a), "2024-01-01T09:00:00.000Z");
    }
}
