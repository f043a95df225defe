//! Photos attached to signalements

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::error::{StorageError, StorageResult};
use super::types::PhotoSignalement;
use super::{fmt_ts, get_ts, Store};

const PHOTO_COLUMNS: &str =
    "id, signalement_id, url, description, ordre, is_principale, uploaded_by, created_at";

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<PhotoSignalement> {
    Ok(PhotoSignalement {
        id: row.get(0)?,
        signalement_id: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        ordre: row.get(4)?,
        is_principale: row.get(5)?,
        uploaded_by: row.get(6)?,
        created_at: get_ts(row, 7)?,
    })
}

impl Store {
    /// Append a photo: ordre = count + 1, principale when it is the first one
    pub fn insert_photo(
        &self,
        signalement_id: i64,
        url: &str,
        description: Option<&str>,
        uploaded_by: Option<i64>,
    ) -> StorageResult<PhotoSignalement> {
        let id = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM photos_signalement WHERE signalement_id = ?",
                params![signalement_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO photos_signalement (signalement_id, url, description, ordre, is_principale, uploaded_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    signalement_id,
                    url,
                    description,
                    count + 1,
                    count == 0,
                    uploaded_by,
                    fmt_ts(&Utc::now())
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            id
        };

        self.get_photo(id)?
            .ok_or_else(|| StorageError::NotFound(format!("photo {}", id)))
    }

    pub fn get_photo(&self, id: i64) -> StorageResult<Option<PhotoSignalement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM photos_signalement WHERE id = ?",
            PHOTO_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_photo).optional()?)
    }

    /// Photos of a signalement in display order
    pub fn list_photos(&self, signalement_id: i64) -> StorageResult<Vec<PhotoSignalement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM photos_signalement WHERE signalement_id = ? ORDER BY ordre, id",
            PHOTO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![signalement_id], row_to_photo)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn principale_photo(&self, signalement_id: i64) -> StorageResult<Option<PhotoSignalement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM photos_signalement WHERE signalement_id = ? AND is_principale = 1 LIMIT 1",
            PHOTO_COLUMNS
        ))?;
        Ok(stmt.query_row(params![signalement_id], row_to_photo).optional()?)
    }

    /// Make `photo_id` the only principale photo of its signalement
    pub fn set_principale_photo(&self, photo_id: i64) -> StorageResult<PhotoSignalement> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let signalement_id: i64 = tx
                .query_row(
                    "SELECT signalement_id FROM photos_signalement WHERE id = ?",
                    params![photo_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("photo {}", photo_id)))?;
            tx.execute(
                "UPDATE photos_signalement SET is_principale = (id = ?) WHERE signalement_id = ?",
                params![photo_id, signalement_id],
            )?;
            tx.commit()?;
        }

        self.get_photo(photo_id)?
            .ok_or_else(|| StorageError::NotFound(format!("photo {}", photo_id)))
    }

    /// Delete a photo; if it was principale the first remaining photo takes over
    pub fn delete_photo(&self, photo_id: i64) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let photo = tx
            .query_row(
                "SELECT signalement_id, is_principale FROM photos_signalement WHERE id = ?",
                params![photo_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        let Some((signalement_id, was_principale)) = photo else {
            return Ok(false);
        };

        tx.execute("DELETE FROM photos_signalement WHERE id = ?", params![photo_id])?;

        if was_principale {
            tx.execute(
                "UPDATE photos_signalement SET is_principale = 1
                 WHERE id = (SELECT id FROM photos_signalement WHERE signalement_id = ?
                             ORDER BY ordre, id LIMIT 1)",
                params![signalement_id],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Renumber photos following `photo_ids` (1-based). Every id must belong
    /// to the signalement, otherwise nothing is changed.
    pub fn reorder_photos(&self, signalement_id: i64, photo_ids: &[i64]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for (idx, photo_id) in photo_ids.iter().enumerate() {
            let owner: Option<i64> = tx
                .query_row(
                    "SELECT signalement_id FROM photos_signalement WHERE id = ?",
                    params![photo_id],
                    |row| row.get(0),
                )
                .optional()?;

            match owner {
                None => return Err(StorageError::NotFound(format!("photo {}", photo_id))),
                Some(owner) if owner != signalement_id => {
                    return Err(StorageError::Conflict(format!(
                        "photo {} does not belong to signalement {}",
                        photo_id, signalement_id
                    )))
                }
                Some(_) => {}
            }

            tx.execute(
                "UPDATE photos_signalement SET ordre = ? WHERE id = ?",
                params![(idx + 1) as i64, photo_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewSignalement;

    fn store_with_signalement() -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let s = store
            .insert_signalement(
                &NewSignalement {
                    latitude: -18.9,
                    longitude: 47.5,
                    description: "Nid de poule".to_string(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        (store, s.id)
    }

    #[test]
    fn test_first_photo_is_principale() {
        let (store, sid) = store_with_signalement();
        let p1 = store.insert_photo(sid, "https://img/1.jpg", None, None).unwrap();
        let p2 = store.insert_photo(sid, "https://img/2.jpg", Some("vue large"), None).unwrap();

        assert!(p1.is_principale);
        assert_eq!(p1.ordre, 1);
        assert!(!p2.is_principale);
        assert_eq!(p2.ordre, 2);
    }

    #[test]
    fn test_set_principale_clears_previous() {
        let (store, sid) = store_with_signalement();
        let p1 = store.insert_photo(sid, "a", None, None).unwrap();
        let p2 = store.insert_photo(sid, "b", None, None).unwrap();

        store.set_principale_photo(p2.id).unwrap();

        assert!(!store.get_photo(p1.id).unwrap().unwrap().is_principale);
        assert_eq!(store.principale_photo(sid).unwrap().unwrap().id, p2.id);
    }

    #[test]
    fn test_delete_principale_promotes_next() {
        let (store, sid) = store_with_signalement();
        let p1 = store.insert_photo(sid, "a", None, None).unwrap();
        let p2 = store.insert_photo(sid, "b", None, None).unwrap();

        assert!(store.delete_photo(p1.id).unwrap());
        assert_eq!(store.principale_photo(sid).unwrap().unwrap().id, p2.id);
        assert!(!store.delete_photo(p1.id).unwrap());
    }

    #[test]
    fn test_reorder_rejects_foreign_photo() {
        let (store, sid) = store_with_signalement();
        let (other_sid, foreign) = {
            let s = store
                .insert_signalement(
                    &NewSignalement {
                        latitude: 0.0,
                        longitude: 0.0,
                        description: "Autre".to_string(),
                        ..Default::default()
                    },
                    None,
                )
                .unwrap();
            let p = store.insert_photo(s.id, "x", None, None).unwrap();
            (s.id, p.id)
        };
        let p1 = store.insert_photo(sid, "a", None, None).unwrap();
        let p2 = store.insert_photo(sid, "b", None, None).unwrap();

        store.reorder_photos(sid, &[p2.id, p1.id]).unwrap();
        let photos = store.list_photos(sid).unwrap();
        assert_eq!(photos[0].id, p2.id);
        assert_eq!(photos[1].ordre, 2);

        let err = store.reorder_photos(sid, &[p1.id, foreign]).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(store.list_photos(other_sid).unwrap()[0].ordre, 1);
        // rolled back: p1 keeps its previous position
        assert_eq!(store.get_photo(p1.id).unwrap().unwrap().ordre, 2);
    }
}
