//! Per-user notifications

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::error::{StorageError, StorageResult};
use super::types::{NewNotification, Notification};
use super::{fmt_ts, get_ts, Store};

const NOTIFICATION_COLUMNS: &str = "id, user_id, signalement_id, type, title, message,
    old_status, new_status, read, created_at";

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        signalement_id: row.get(2)?,
        notification_type: row.get(3)?,
        title: row.get(4)?,
        message: row.get(5)?,
        old_status: row.get(6)?,
        new_status: row.get(7)?,
        read: row.get(8)?,
        created_at: get_ts(row, 9)?,
    })
}

impl Store {
    pub fn insert_notification(&self, new: &NewNotification) -> StorageResult<Notification> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO notifications (user_id, signalement_id, type, title, message,
                    old_status, new_status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    new.user_id,
                    new.signalement_id,
                    new.notification_type,
                    new.title,
                    new.message,
                    new.old_status,
                    new.new_status,
                    fmt_ts(&Utc::now())
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get_notification(id)?
            .ok_or_else(|| StorageError::NotFound(format!("notification {}", id)))
    }

    pub fn get_notification(&self, id: i64) -> StorageResult<Option<Notification>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM notifications WHERE id = ?",
            NOTIFICATION_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_notification).optional()?)
    }

    /// Newest first
    pub fn list_notifications(&self, user_id: i64, unread_only: bool) -> StorageResult<Vec<Notification>> {
        let conn = self.conn()?;
        let sql = if unread_only {
            format!(
                "SELECT {} FROM notifications WHERE user_id = ? AND read = 0
                 ORDER BY created_at DESC, id DESC",
                NOTIFICATION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM notifications WHERE user_id = ? ORDER BY created_at DESC, id DESC",
                NOTIFICATION_COLUMNS
            )
        };
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![user_id], row_to_notification)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_unread_notifications(&self, user_id: i64) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn mark_notification_read(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("UPDATE notifications SET read = 1 WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    /// Returns how many notifications changed state
    pub fn mark_all_notifications_read(&self, user_id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0",
            params![user_id],
        )?)
    }

    pub fn delete_notification(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM notifications WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewUser, NotificationType, Role, Statut};

    fn store_with_user() -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let user = store
            .insert_user(&NewUser {
                email: "rakoto@example.mg".to_string(),
                password_hash: "x".to_string(),
                name: "Rakoto".to_string(),
                role: Role::Utilisateur,
                created_by: None,
            })
            .unwrap();
        (store, user.id)
    }

    #[test]
    fn test_insert_and_unread_count() {
        let (store, uid) = store_with_user();
        let n = store
            .insert_notification(
                &NewNotification::new(
                    uid,
                    NotificationType::StatusChange,
                    "Mise à jour de votre signalement",
                    "Votre signalement est passé à En cours",
                )
                .transition(Statut::Nouveau, Statut::EnCours),
            )
            .unwrap();

        assert!(!n.read);
        assert_eq!(n.new_status, Some(Statut::EnCours));
        assert_eq!(store.count_unread_notifications(uid).unwrap(), 1);

        assert!(store.mark_notification_read(n.id).unwrap());
        assert_eq!(store.count_unread_notifications(uid).unwrap(), 0);
        assert_eq!(store.list_notifications(uid, false).unwrap().len(), 1);
        assert!(store.list_notifications(uid, true).unwrap().is_empty());
    }

    #[test]
    fn test_mark_all_read() {
        let (store, uid) = store_with_user();
        for i in 0..3 {
            store
                .insert_notification(&NewNotification::new(
                    uid,
                    NotificationType::Info,
                    "Info",
                    format!("message {}", i),
                ))
                .unwrap();
        }

        assert_eq!(store.mark_all_notifications_read(uid).unwrap(), 3);
        assert_eq!(store.mark_all_notifications_read(uid).unwrap(), 0);
    }
}
