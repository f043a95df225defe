//! Key/value application settings (`configurations` table)

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::error::{StorageError, StorageResult};
use super::types::Configuration;
use super::{fmt_ts, get_ts, Store};

/// Well-known key holding the price per square metre used for budgets
pub const PRIX_PAR_M2: &str = "PRIX_PAR_M2";

const CONFIG_COLUMNS: &str = "id, cle, valeur, type, description, updated_by, updated_at";

fn row_to_configuration(row: &Row<'_>) -> rusqlite::Result<Configuration> {
    Ok(Configuration {
        id: row.get(0)?,
        cle: row.get(1)?,
        valeur: row.get(2)?,
        value_type: row.get(3)?,
        description: row.get(4)?,
        updated_by: row.get(5)?,
        updated_at: get_ts(row, 6)?,
    })
}

impl Store {
    pub fn list_configurations(&self) -> StorageResult<Vec<Configuration>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM configurations ORDER BY cle",
            CONFIG_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_configuration)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_configuration(&self, id: i64) -> StorageResult<Option<Configuration>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM configurations WHERE id = ?",
            CONFIG_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_configuration).optional()?)
    }

    pub fn get_configuration_by_key(&self, cle: &str) -> StorageResult<Option<Configuration>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM configurations WHERE cle = ?",
            CONFIG_COLUMNS
        ))?;
        Ok(stmt.query_row(params![cle], row_to_configuration).optional()?)
    }

    /// Insert or replace the value stored under `cle`. The description is
    /// only overwritten when one is given.
    pub fn upsert_configuration(
        &self,
        cle: &str,
        valeur: &str,
        value_type: &str,
        description: Option<&str>,
        updated_by: Option<i64>,
    ) -> StorageResult<Configuration> {
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO configurations (cle, valeur, type, description, updated_by, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(cle) DO UPDATE SET
                    valeur = excluded.valeur,
                    type = excluded.type,
                    description = COALESCE(excluded.description, configurations.description),
                    updated_by = excluded.updated_by,
                    updated_at = excluded.updated_at",
                params![cle, valeur, value_type, description, updated_by, fmt_ts(&Utc::now())],
            )?;
        }

        self.get_configuration_by_key(cle)?
            .ok_or_else(|| StorageError::NotFound(format!("configuration {}", cle)))
    }

    /// Insert only when `cle` is absent; returns whether a row was written
    pub fn insert_configuration_if_absent(
        &self,
        cle: &str,
        valeur: &str,
        value_type: &str,
        description: Option<&str>,
    ) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO configurations (cle, valeur, type, description, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![cle, valeur, value_type, description, fmt_ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    pub fn save_configuration(&self, config: &Configuration) -> StorageResult<Configuration> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE configurations SET valeur = ?, type = ?, description = ?, updated_by = ?,
                    updated_at = ?
                 WHERE id = ?",
                params![
                    config.valeur,
                    config.value_type,
                    config.description,
                    config.updated_by,
                    fmt_ts(&Utc::now()),
                    config.id
                ],
            )?
        };

        if changed == 0 {
            return Err(StorageError::NotFound(format!("configuration {}", config.id)));
        }

        self.get_configuration(config.id)?
            .ok_or_else(|| StorageError::NotFound(format!("configuration {}", config.id)))
    }

    pub fn delete_configuration(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM configurations WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_value_keeps_description() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .upsert_configuration(PRIX_PAR_M2, "10000", "DECIMAL", Some("Prix au m²"), None)
            .unwrap();
        let second = store
            .upsert_configuration(PRIX_PAR_M2, "12500.5", "DECIMAL", None, None)
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.as_decimal(), Some(12500.5));
        assert_eq!(second.description.as_deref(), Some("Prix au m²"));
    }

    #[test]
    fn test_insert_if_absent() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .insert_configuration_if_absent(PRIX_PAR_M2, "10000", "DECIMAL", None)
            .unwrap());
        assert!(!store
            .insert_configuration_if_absent(PRIX_PAR_M2, "1", "DECIMAL", None)
            .unwrap());

        let config = store.get_configuration_by_key(PRIX_PAR_M2).unwrap().unwrap();
        assert_eq!(config.valeur, "10000");
    }

    #[test]
    fn test_delete() {
        let store = Store::open_in_memory().unwrap();
        let config = store
            .upsert_configuration("DEVISE", "MGA", "STRING", None, None)
            .unwrap();

        assert!(store.delete_configuration(config.id).unwrap());
        assert!(store.list_configurations().unwrap().is_empty());
    }
}
