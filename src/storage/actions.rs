//! Works records (signalement actions)

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::error::{StorageError, StorageResult};
use super::types::{NewAction, SignalementAction};
use super::{fmt_opt_ts, fmt_ts, get_opt_ts, get_string_list, get_ts, string_list, Store};

const ACTION_COLUMNS: &str = "id, signalement_id, entreprise_id, surface_m2, budget,
    date_debut_travaux, date_fin_prevue, date_fin_reelle, description_travaux, materiel_utilise,
    travaux_conformes, commentaire_fin, photos_avant, photos_apres, created_by, modified_by,
    created_at, updated_at";

fn row_to_action(row: &Row<'_>) -> rusqlite::Result<SignalementAction> {
    Ok(SignalementAction {
        id: row.get(0)?,
        signalement_id: row.get(1)?,
        entreprise_id: row.get(2)?,
        surface_m2: row.get(3)?,
        budget: row.get(4)?,
        date_debut_travaux: get_opt_ts(row, 5)?,
        date_fin_prevue: get_opt_ts(row, 6)?,
        date_fin_reelle: get_opt_ts(row, 7)?,
        description_travaux: row.get(8)?,
        materiel_utilise: row.get(9)?,
        travaux_conformes: row.get(10)?,
        commentaire_fin: row.get(11)?,
        photos_avant: get_string_list(row, 12)?,
        photos_apres: get_string_list(row, 13)?,
        created_by: row.get(14)?,
        modified_by: row.get(15)?,
        created_at: get_ts(row, 16)?,
        updated_at: get_ts(row, 17)?,
    })
}

impl Store {
    pub fn insert_action(&self, new: &NewAction) -> StorageResult<SignalementAction> {
        let now = fmt_ts(&Utc::now());
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO signalement_actions (signalement_id, entreprise_id, surface_m2, budget,
                    date_debut_travaux, date_fin_prevue, description_travaux, materiel_utilise,
                    created_by, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    new.signalement_id,
                    new.entreprise_id,
                    new.surface_m2,
                    new.budget,
                    fmt_opt_ts(&new.date_debut_travaux),
                    fmt_opt_ts(&new.date_fin_prevue),
                    new.description_travaux,
                    new.materiel_utilise,
                    new.created_by,
                    now,
                    now
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get_action(id)?
            .ok_or_else(|| StorageError::NotFound(format!("action {}", id)))
    }

    pub fn get_action(&self, id: i64) -> StorageResult<Option<SignalementAction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalement_actions WHERE id = ?",
            ACTION_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_action).optional()?)
    }

    pub fn list_actions_for_signalement(&self, signalement_id: i64) -> StorageResult<Vec<SignalementAction>> {
        self.query_actions("WHERE signalement_id = ? ORDER BY created_at DESC, id DESC", signalement_id)
    }

    pub fn list_actions_for_entreprise(&self, entreprise_id: i64) -> StorageResult<Vec<SignalementAction>> {
        self.query_actions("WHERE entreprise_id = ? ORDER BY created_at DESC, id DESC", entreprise_id)
    }

    pub fn list_actions(&self) -> StorageResult<Vec<SignalementAction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalement_actions ORDER BY id",
            ACTION_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_action)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Started and not finished
    pub fn list_actions_en_cours(&self) -> StorageResult<Vec<SignalementAction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalement_actions
             WHERE date_debut_travaux IS NOT NULL AND date_fin_reelle IS NULL
             ORDER BY date_debut_travaux",
            ACTION_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_action)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Planned end before `now` and not finished
    pub fn list_actions_en_retard(&self, now: DateTime<Utc>) -> StorageResult<Vec<SignalementAction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalement_actions
             WHERE date_fin_prevue IS NOT NULL AND date_fin_prevue < ? AND date_fin_reelle IS NULL
             ORDER BY date_fin_prevue",
            ACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![fmt_ts(&now)], row_to_action)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Persist every mutable field and bump updated_at
    pub fn save_action(&self, a: &SignalementAction) -> StorageResult<SignalementAction> {
        let photos_avant = string_list(&a.photos_avant)?;
        let photos_apres = string_list(&a.photos_apres)?;
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE signalement_actions SET entreprise_id = ?, surface_m2 = ?, budget = ?,
                    date_debut_travaux = ?, date_fin_prevue = ?, date_fin_reelle = ?,
                    description_travaux = ?, materiel_utilise = ?, travaux_conformes = ?,
                    commentaire_fin = ?, photos_avant = ?, photos_apres = ?, modified_by = ?,
                    updated_at = ?
                 WHERE id = ?",
                params![
                    a.entreprise_id,
                    a.surface_m2,
                    a.budget,
                    fmt_opt_ts(&a.date_debut_travaux),
                    fmt_opt_ts(&a.date_fin_prevue),
                    fmt_opt_ts(&a.date_fin_reelle),
                    a.description_travaux,
                    a.materiel_utilise,
                    a.travaux_conformes,
                    a.commentaire_fin,
                    photos_avant,
                    photos_apres,
                    a.modified_by,
                    fmt_ts(&Utc::now()),
                    a.id
                ],
            )?
        };

        if changed == 0 {
            return Err(StorageError::NotFound(format!("action {}", a.id)));
        }

        self.get_action(a.id)?
            .ok_or_else(|| StorageError::NotFound(format!("action {}", a.id)))
    }

    pub fn delete_action(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM signalement_actions WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    fn query_actions(&self, tail: &str, key: i64) -> StorageResult<Vec<SignalementAction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM signalement_actions {}",
            ACTION_COLUMNS, tail
        ))?;
        let rows = stmt.query_map(params![key], row_to_action)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
