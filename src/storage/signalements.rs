//! Signalements and their status history

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use std::collections::HashMap;

use super::error::{StorageError, StorageResult};
use super::types::{HistoriqueStatus, NewSignalement, Signalement, SignalementFilter, Statut};
use super::{fmt_ts, get_opt_ts, get_ts, Store};

const SIGNALEMENT_COLUMNS: &str = "id, user_id, latitude, longitude, adresse, description,
    budget, niveau, surface, entreprise_id, status, date_signalement, created_at, updated_at,
    firebase_id, firebase_synced, last_sync_at";

const HISTORY_COLUMNS: &str =
    "id, signalement_id, ancien_status, nouveau_status, commentaire, changed_by, changed_at";

pub const CREATION_COMMENT: &str = "Création du signalement";

fn row_to_signalement(row: &Row<'_>) -> rusqlite::Result<Signalement> {
    Ok(Signalement {
        id: row.get(0)?,
        user_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        adresse: row.get(4)?,
        description: row.get(5)?,
        budget: row.get(6)?,
        niveau: row.get(7)?,
        surface: row.get(8)?,
        entreprise_id: row.get(9)?,
        status: row.get(10)?,
        date_signalement: get_ts(row, 11)?,
        created_at: get_ts(row, 12)?,
        updated_at: get_ts(row, 13)?,
        firebase_id: row.get(14)?,
        firebase_synced: row.get(15)?,
        last_sync_at: get_opt_ts(row, 16)?,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<HistoriqueStatus> {
    Ok(HistoriqueStatus {
        id: row.get(0)?,
        signalement_id: row.get(1)?,
        ancien_status: row.get(2)?,
        nouveau_status: row.get(3)?,
        commentaire: row.get(4)?,
        changed_by: row.get(5)?,
        changed_at: get_ts(row, 6)?,
    })
}

fn insert_history(
    tx: &Transaction<'_>,
    signalement_id: i64,
    ancien: Option<Statut>,
    nouveau: Statut,
    commentaire: Option<&str>,
    changed_by: Option<i64>,
    at: &str,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO historique_status (signalement_id, ancien_status, nouveau_status, commentaire, changed_by, changed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![signalement_id, ancien, nouveau, commentaire, changed_by, at],
    )?;
    Ok(())
}

/// Aggregates over all signalements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalementTotals {
    pub total: u64,
    pub total_surface: f64,
    pub total_budget: f64,
    pub by_status: HashMap<Statut, u64>,
    /// Budget of signalements that are en_cours or termine
    pub budget_engage: f64,
}

impl SignalementTotals {
    pub fn count(&self, status: Statut) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

impl Store {
    /// Insert a signalement and its initial history row in one transaction
    pub fn insert_signalement(
        &self,
        new: &NewSignalement,
        firebase_id: Option<&str>,
    ) -> StorageResult<Signalement> {
        let now = Utc::now();
        let now_s = fmt_ts(&now);
        let status = new.status.unwrap_or(Statut::Nouveau);
        let date = fmt_ts(&new.date_signalement.unwrap_or(now));

        let id = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO signalements (user_id, latitude, longitude, adresse, description,
                    budget, niveau, surface, entreprise_id, status, date_signalement,
                    created_at, updated_at, firebase_id, firebase_synced)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    new.user_id,
                    new.latitude,
                    new.longitude,
                    new.adresse,
                    new.description.trim(),
                    new.budget,
                    new.niveau,
                    new.surface,
                    new.entreprise_id,
                    status,
                    date,
                    now_s,
                    now_s,
                    firebase_id,
                    firebase_id.is_some()
                ],
            )?;
            let id = tx.last_insert_rowid();
            insert_history(
                &tx,
                id,
                Some(status),
                status,
                Some(CREATION_COMMENT),
                new.user_id,
                &now_s,
            )?;
            tx.commit()?;
            id
        };

        self.get_signalement(id)?
            .ok_or_else(|| StorageError::NotFound(format!("signalement {}", id)))
    }

    pub fn get_signalement(&self, id: i64) -> StorageResult<Option<Signalement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalements WHERE id = ?",
            SIGNALEMENT_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_signalement).optional()?)
    }

    pub fn get_signalement_by_firebase_id(&self, firebase_id: &str) -> StorageResult<Option<Signalement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalements WHERE firebase_id = ?",
            SIGNALEMENT_COLUMNS
        ))?;
        Ok(stmt.query_row(params![firebase_id], row_to_signalement).optional()?)
    }

    /// List signalements matching `filter`, newest report first
    pub fn list_signalements(&self, filter: &SignalementFilter) -> StorageResult<Vec<Signalement>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(user_id) = filter.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Integer(user_id));
        }
        if let Some(entreprise_id) = filter.entreprise_id {
            clauses.push("entreprise_id = ?");
            values.push(Value::Integer(entreprise_id));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push("(LOWER(description) LIKE ? OR LOWER(COALESCE(adresse, '')) LIKE ?)");
            let pattern = format!("%{}%", search.trim().to_lowercase());
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        if let Some(since) = filter.since {
            clauses.push("date_signalement >= ?");
            values.push(Value::Text(fmt_ts(&since)));
        }
        if let Some(until) = filter.until {
            clauses.push("date_signalement < ?");
            values.push(Value::Text(fmt_ts(&until)));
        }

        let mut sql = format!("SELECT {} FROM signalements", SIGNALEMENT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY date_signalement DESC, id DESC");
        // SQLite needs a LIMIT before OFFSET; -1 means unbounded
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(filter.limit.map(|l| l as i64).unwrap_or(-1)));
        values.push(Value::Integer(filter.offset as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_signalement)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Signalements inside a lat/lng bounding box
    pub fn list_signalements_in_bounds(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lng: f64,
        max_lng: f64,
    ) -> StorageResult<Vec<Signalement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalements
             WHERE latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?",
            SIGNALEMENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![min_lat, max_lat, min_lng, max_lng], row_to_signalement)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_signalements(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM signalements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Persist the editable fields of a signalement. Status goes through
    /// [`Store::set_signalement_status`]; the row is flagged for sync.
    pub fn save_signalement(&self, s: &Signalement) -> StorageResult<Signalement> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE signalements SET user_id = ?, latitude = ?, longitude = ?, adresse = ?,
                    description = ?, budget = ?, niveau = ?, surface = ?, entreprise_id = ?,
                    date_signalement = ?, updated_at = ?, firebase_synced = 0
                 WHERE id = ?",
                params![
                    s.user_id,
                    s.latitude,
                    s.longitude,
                    s.adresse,
                    s.description.trim(),
                    s.budget,
                    s.niveau,
                    s.surface,
                    s.entreprise_id,
                    fmt_ts(&s.date_signalement),
                    fmt_ts(&Utc::now()),
                    s.id
                ],
            )?
        };

        if changed == 0 {
            return Err(StorageError::NotFound(format!("signalement {}", s.id)));
        }

        self.get_signalement(s.id)?
            .ok_or_else(|| StorageError::NotFound(format!("signalement {}", s.id)))
    }

    /// Change status and append the history row atomically
    pub fn set_signalement_status(
        &self,
        id: i64,
        ancien: Statut,
        nouveau: Statut,
        commentaire: Option<&str>,
        changed_by: Option<i64>,
    ) -> StorageResult<Signalement> {
        let now_s = fmt_ts(&Utc::now());
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE signalements SET status = ?, updated_at = ?, firebase_synced = 0
                 WHERE id = ? AND status = ?",
                params![nouveau, now_s, id, ancien],
            )?;
            if changed == 0 {
                return Err(StorageError::Conflict(format!(
                    "signalement {} is no longer {}",
                    id, ancien
                )));
            }
            insert_history(&tx, id, Some(ancien), nouveau, commentaire, changed_by, &now_s)?;
            tx.commit()?;
        }

        self.get_signalement(id)?
            .ok_or_else(|| StorageError::NotFound(format!("signalement {}", id)))
    }

    /// Delete a signalement; photos, actions and history cascade
    pub fn delete_signalement(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM signalements WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    /// Count, surface and budget sums grouped by status
    pub fn signalement_totals(&self) -> StorageResult<SignalementTotals> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT status, COUNT(*), COALESCE(SUM(surface), 0), COALESCE(SUM(budget), 0)
             FROM signalements GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Statut>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;

        let mut totals = SignalementTotals::default();
        for row in rows {
            let (status, count, surface, budget) = row?;
            totals.total += count as u64;
            totals.total_surface += surface;
            totals.total_budget += budget;
            if matches!(status, Statut::EnCours | Statut::Termine) {
                totals.budget_engage += budget;
            }
            totals.by_status.insert(status, count as u64);
        }
        Ok(totals)
    }

    /// Budget summed per entreprise, highest first
    pub fn budget_by_entreprise(&self, limit: usize) -> StorageResult<Vec<(i64, String, f64, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT e.id, e.nom, COALESCE(SUM(s.budget), 0) AS total, COUNT(s.id)
             FROM entreprises e JOIN signalements s ON s.entreprise_id = e.id
             GROUP BY e.id, e.nom
             ORDER BY total DESC, e.id
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get::<_, i64>(3)? as u64,
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ============================================
    // History
    // ============================================

    /// History of a signalement, newest first
    pub fn list_history(&self, signalement_id: i64) -> StorageResult<Vec<HistoriqueStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM historique_status WHERE signalement_id = ?
             ORDER BY changed_at DESC, id DESC",
            HISTORY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![signalement_id], row_to_history)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn latest_history(&self, signalement_id: i64) -> StorageResult<Option<HistoriqueStatus>> {
        Ok(self.list_history(signalement_id)?.into_iter().next())
    }

    pub fn get_history(&self, id: i64) -> StorageResult<Option<HistoriqueStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM historique_status WHERE id = ?",
            HISTORY_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_history).optional()?)
    }

    pub fn delete_history(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM historique_status WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    /// First time each signalement reached `status` (signalement id → timestamp)
    pub fn first_reached(&self, status: Statut) -> StorageResult<Vec<(i64, DateTime<Utc>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT signalement_id, MIN(changed_at) FROM historique_status
             WHERE nouveau_status = ? AND (ancien_status IS NULL OR ancien_status != nouveau_status)
             GROUP BY signalement_id",
        )?;
        let rows = stmt.query_map(params![status], |row| Ok((row.get(0)?, get_ts(row, 1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ============================================
    // Sync bookkeeping
    // ============================================

    pub fn mark_signalement_synced(&self, id: i64, firebase_id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE signalements SET firebase_id = ?, firebase_synced = 1, last_sync_at = ?
             WHERE id = ?",
            params![firebase_id, fmt_ts(&Utc::now()), id],
        )?;
        Ok(())
    }

    /// Write a remote copy over the local row (or insert it), keeping the
    /// remote `updated_at`. Appends a history row when the status differs.
    pub fn save_remote_signalement(&self, remote: &Signalement) -> StorageResult<i64> {
        let firebase_id = remote
            .firebase_id
            .as_deref()
            .ok_or_else(|| StorageError::Conflict("remote signalement without id".to_string()))?;
        let existing = self.get_signalement_by_firebase_id(firebase_id)?;
        let now_s = fmt_ts(&Utc::now());

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = match existing {
            Some(local) => {
                tx.execute(
                    "UPDATE signalements SET latitude = ?, longitude = ?, adresse = ?,
                        description = ?, budget = ?, niveau = ?, surface = ?, status = ?,
                        date_signalement = ?, updated_at = ?, firebase_synced = 1, last_sync_at = ?
                     WHERE id = ?",
                    params![
                        remote.latitude,
                        remote.longitude,
                        remote.adresse,
                        remote.description,
                        remote.budget,
                        remote.niveau,
                        remote.surface,
                        remote.status,
                        fmt_ts(&remote.date_signalement),
                        fmt_ts(&remote.updated_at),
                        now_s,
                        local.id
                    ],
                )?;
                if local.status != remote.status {
                    insert_history(
                        &tx,
                        local.id,
                        Some(local.status),
                        remote.status,
                        Some("Synchronisation distante"),
                        None,
                        &now_s,
                    )?;
                }
                local.id
            }
            None => {
                tx.execute(
                    "INSERT INTO signalements (user_id, latitude, longitude, adresse, description,
                        budget, niveau, surface, status, date_signalement, created_at, updated_at,
                        firebase_id, firebase_synced, last_sync_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
                    params![
                        remote.user_id,
                        remote.latitude,
                        remote.longitude,
                        remote.adresse,
                        remote.description,
                        remote.budget,
                        remote.niveau,
                        remote.surface,
                        remote.status,
                        fmt_ts(&remote.date_signalement),
                        fmt_ts(&remote.created_at),
                        fmt_ts(&remote.updated_at),
                        firebase_id,
                        now_s
                    ],
                )?;
                let id = tx.last_insert_rowid();
                insert_history(
                    &tx,
                    id,
                    Some(remote.status),
                    remote.status,
                    Some(CREATION_COMMENT),
                    None,
                    &now_s,
                )?;
                id
            }
        };
        tx.commit()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(description: &str) -> NewSignalement {
        NewSignalement {
            latitude: -18.8792,
            longitude: 47.5079,
            adresse: Some("Analakely".to_string()),
            description: description.to_string(),
            surface: Some(12.5),
            budget: Some(250_000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_writes_initial_history() {
        let store = Store::open_in_memory().unwrap();
        let s = store.insert_signalement(&sample("Nid de poule"), None).unwrap();

        assert_eq!(s.status, Statut::Nouveau);
        assert!(!s.firebase_synced);

        let history = store.list_history(s.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ancien_status, Some(Statut::Nouveau));
        assert_eq!(history[0].nouveau_status, Statut::Nouveau);
        assert_eq!(history[0].commentaire.as_deref(), Some(CREATION_COMMENT));
    }

    #[test]
    fn test_set_status_appends_history() {
        let store = Store::open_in_memory().unwrap();
        let s = store.insert_signalement(&sample("Fuite d'eau"), None).unwrap();

        let updated = store
            .set_signalement_status(s.id, Statut::Nouveau, Statut::EnCours, Some("Pris en charge"), None)
            .unwrap();
        assert_eq!(updated.status, Statut::EnCours);

        let latest = store.latest_history(s.id).unwrap().unwrap();
        assert_eq!(latest.ancien_status, Some(Statut::Nouveau));
        assert_eq!(latest.nouveau_status, Statut::EnCours);
        assert_eq!(store.list_history(s.id).unwrap().len(), 2);
    }

    #[test]
    fn test_set_status_rejects_stale_previous() {
        let store = Store::open_in_memory().unwrap();
        let s = store.insert_signalement(&sample("Trottoir"), None).unwrap();

        let err = store
            .set_signalement_status(s.id, Statut::EnCours, Statut::Termine, None, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn test_filter_by_status_and_search() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_signalement(&sample("Nid de poule"), None).unwrap();
        store.insert_signalement(&sample("Caniveau bouché"), None).unwrap();
        store
            .set_signalement_status(a.id, Statut::Nouveau, Statut::EnCours, None, None)
            .unwrap();

        let en_cours = store
            .list_signalements(&SignalementFilter::new().status(Statut::EnCours))
            .unwrap();
        assert_eq!(en_cours.len(), 1);
        assert_eq!(en_cours[0].id, a.id);

        let found = store
            .list_signalements(&SignalementFilter::new().search("CANIVEAU"))
            .unwrap();
        assert_eq!(found.len(), 1);

        let page = store
            .list_signalements(&SignalementFilter::new().page(1, 1))
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_filter_by_date_range() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut old = sample("Ancien");
        old.date_signalement = Some(now - Duration::days(20));
        store.insert_signalement(&old, None).unwrap();
        store.insert_signalement(&sample("Récent"), None).unwrap();

        let recent = store
            .list_signalements(&SignalementFilter::new().between(Some(now - Duration::days(7)), None))
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].description, "Récent");
    }

    #[test]
    fn test_totals() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_signalement(&sample("A"), None).unwrap();
        store.insert_signalement(&sample("B"), None).unwrap();
        store
            .set_signalement_status(a.id, Statut::Nouveau, Statut::EnCours, None, None)
            .unwrap();

        let totals = store.signalement_totals().unwrap();
        assert_eq!(totals.total, 2);
        assert_eq!(totals.count(Statut::Nouveau), 1);
        assert_eq!(totals.count(Statut::EnCours), 1);
        assert_eq!(totals.count(Statut::Termine), 0);
        assert!((totals.total_surface - 25.0).abs() < 1e-9);
        assert!((totals.budget_engage - 250_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_save_marks_unsynced() {
        let store = Store::open_in_memory().unwrap();
        let s = store.insert_signalement(&sample("A"), None).unwrap();
        store.mark_signalement_synced(s.id, "remote-1").unwrap();
        assert!(store.get_signalement(s.id).unwrap().unwrap().firebase_synced);

        let mut edited = store.get_signalement(s.id).unwrap().unwrap();
        edited.description = "A modifié".to_string();
        let saved = store.save_signalement(&edited).unwrap();
        assert!(!saved.firebase_synced);
        assert_eq!(saved.firebase_id.as_deref(), Some("remote-1"));
    }

    #[test]
    fn test_save_remote_inserts_then_updates() {
        let store = Store::open_in_memory().unwrap();
        let local = store.insert_signalement(&sample("Local"), None).unwrap();

        let mut remote = local.clone();
        remote.firebase_id = Some("fs-1".to_string());
        remote.description = "Distant".to_string();
        let id = store.save_remote_signalement(&remote).unwrap();
        assert_ne!(id, local.id);

        remote.status = Statut::EnCours;
        let same = store.save_remote_signalement(&remote).unwrap();
        assert_eq!(same, id);

        let saved = store.get_signalement(id).unwrap().unwrap();
        assert_eq!(saved.status, Statut::EnCours);
        assert!(saved.firebase_synced);
        assert_eq!(store.list_history(id).unwrap().len(), 2);
    }
}
