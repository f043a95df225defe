//! Contractor companies

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::error::{StorageError, StorageResult};
use super::types::{Entreprise, NewEntreprise};
use super::{fmt_ts, get_string_list, get_ts, string_list, Store};

const ENTREPRISE_COLUMNS: &str = "id, nom, siret, telephone, email, adresse, specialites,
    is_active, note_moyenne, nombre_interventions, created_by, created_at, updated_at";

fn row_to_entreprise(row: &Row<'_>) -> rusqlite::Result<Entreprise> {
    Ok(Entreprise {
        id: row.get(0)?,
        nom: row.get(1)?,
        siret: row.get(2)?,
        telephone: row.get(3)?,
        email: row.get(4)?,
        adresse: row.get(5)?,
        specialites: get_string_list(row, 6)?,
        is_active: row.get(7)?,
        note_moyenne: row.get(8)?,
        nombre_interventions: row.get(9)?,
        created_by: row.get(10)?,
        created_at: get_ts(row, 11)?,
        updated_at: get_ts(row, 12)?,
    })
}

impl Store {
    /// Insert an entreprise; duplicate nom or siret yields `Conflict`
    pub fn insert_entreprise(&self, new: &NewEntreprise) -> StorageResult<Entreprise> {
        let now = fmt_ts(&Utc::now());
        let specialites = string_list(&new.specialites)?;
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO entreprises (nom, siret, telephone, email, adresse, specialites,
                    created_by, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    new.nom.trim(),
                    new.siret,
                    new.telephone,
                    new.email,
                    new.adresse,
                    specialites,
                    new.created_by,
                    now,
                    now
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get_entreprise(id)?
            .ok_or_else(|| StorageError::NotFound(format!("entreprise {}", id)))
    }

    pub fn get_entreprise(&self, id: i64) -> StorageResult<Option<Entreprise>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM entreprises WHERE id = ?",
            ENTREPRISE_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_entreprise).optional()?)
    }

    pub fn get_entreprise_by_nom(&self, nom: &str) -> StorageResult<Option<Entreprise>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM entreprises WHERE nom = ?",
            ENTREPRISE_COLUMNS
        ))?;
        Ok(stmt.query_row(params![nom.trim()], row_to_entreprise).optional()?)
    }

    pub fn list_entreprises(&self, active_only: bool) -> StorageResult<Vec<Entreprise>> {
        let conn = self.conn()?;
        let sql = if active_only {
            format!(
                "SELECT {} FROM entreprises WHERE is_active = 1 ORDER BY nom",
                ENTREPRISE_COLUMNS
            )
        } else {
            format!("SELECT {} FROM entreprises ORDER BY nom", ENTREPRISE_COLUMNS)
        };
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_entreprise)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Active entreprises listing `specialite` (case-insensitive)
    pub fn list_entreprises_by_specialite(&self, specialite: &str) -> StorageResult<Vec<Entreprise>> {
        let wanted = specialite.trim().to_lowercase();
        Ok(self
            .list_entreprises(true)?
            .into_iter()
            .filter(|e| e.specialites.iter().any(|s| s.to_lowercase() == wanted))
            .collect())
    }

    /// Active entreprises with a rating, best first
    pub fn top_rated_entreprises(&self, limit: usize) -> StorageResult<Vec<Entreprise>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM entreprises
             WHERE is_active = 1 AND note_moyenne IS NOT NULL
             ORDER BY note_moyenne DESC, nombre_interventions DESC
             LIMIT ?",
            ENTREPRISE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_entreprise)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_active_entreprises(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entreprises WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Persist every mutable field and bump updated_at
    pub fn save_entreprise(&self, e: &Entreprise) -> StorageResult<Entreprise> {
        let specialites = string_list(&e.specialites)?;
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE entreprises SET nom = ?, siret = ?, telephone = ?, email = ?, adresse = ?,
                    specialites = ?, is_active = ?, note_moyenne = ?, nombre_interventions = ?,
                    updated_at = ?
                 WHERE id = ?",
                params![
                    e.nom.trim(),
                    e.siret,
                    e.telephone,
                    e.email,
                    e.adresse,
                    specialites,
                    e.is_active,
                    e.note_moyenne,
                    e.nombre_interventions,
                    fmt_ts(&Utc::now()),
                    e.id
                ],
            )?
        };

        if changed == 0 {
            return Err(StorageError::NotFound(format!("entreprise {}", e.id)));
        }

        self.get_entreprise(e.id)?
            .ok_or_else(|| StorageError::NotFound(format!("entreprise {}", e.id)))
    }

    pub fn increment_interventions(&self, id: i64) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entreprises SET nombre_interventions = nombre_interventions + 1, updated_at = ?
             WHERE id = ?",
            params![fmt_ts(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("entreprise {}", id)));
        }
        Ok(())
    }

    pub fn delete_entreprise(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM entreprises WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colas() -> NewEntreprise {
        NewEntreprise {
            nom: "COLAS Madagascar".to_string(),
            siret: Some("12345678900011".to_string()),
            email: Some("contact@colas.mg".to_string()),
            specialites: vec!["voirie".to_string(), "enrobé".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_roundtrips_specialites() {
        let store = Store::open_in_memory().unwrap();
        let e = store.insert_entreprise(&colas()).unwrap();

        assert!(e.is_active);
        assert_eq!(e.nombre_interventions, 0);
        assert_eq!(e.specialites, vec!["voirie", "enrobé"]);
        assert_eq!(store.list_entreprises_by_specialite("Voirie").unwrap().len(), 1);
        assert!(store.list_entreprises_by_specialite("éclairage").unwrap().is_empty());
    }

    #[test]
    fn test_unique_nom() {
        let store = Store::open_in_memory().unwrap();
        store.insert_entreprise(&colas()).unwrap();

        let mut other = colas();
        other.siret = None;
        let err = store.insert_entreprise(&other).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn test_active_listing_and_interventions() {
        let store = Store::open_in_memory().unwrap();
        let mut e = store.insert_entreprise(&colas()).unwrap();
        store.increment_interventions(e.id).unwrap();
        store.increment_interventions(e.id).unwrap();

        e = store.get_entreprise(e.id).unwrap().unwrap();
        assert_eq!(e.nombre_interventions, 2);

        e.is_active = false;
        store.save_entreprise(&e).unwrap();
        assert!(store.list_entreprises(true).unwrap().is_empty());
        assert_eq!(store.list_entreprises(false).unwrap().len(), 1);
        assert_eq!(store.count_active_entreprises().unwrap(), 0);
    }
}
