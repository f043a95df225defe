//! Users, sessions and login attempts

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::error::{StorageError, StorageResult};
use super::types::{LoginAttempt, LoginFailure, NewUser, Session, User};
use super::{fmt_opt_ts, fmt_ts, get_opt_ts, get_ts, Store};

const USER_COLUMNS: &str = "id, email, password_hash, name, role, is_locked, locked_until,
    failed_attempts, last_failed_attempt_at, firebase_uid, firebase_synced, synced_at,
    created_by, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, token, ip_address, user_agent, created_at,
    expires_at, last_activity, is_active";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        role: row.get(4)?,
        is_locked: row.get(5)?,
        locked_until: get_opt_ts(row, 6)?,
        failed_attempts: row.get(7)?,
        last_failed_attempt_at: get_opt_ts(row, 8)?,
        firebase_uid: row.get(9)?,
        firebase_synced: row.get(10)?,
        synced_at: get_opt_ts(row, 11)?,
        created_by: row.get(12)?,
        created_at: get_ts(row, 13)?,
        updated_at: get_ts(row, 14)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token: row.get(2)?,
        ip_address: row.get(3)?,
        user_agent: row.get(4)?,
        created_at: get_ts(row, 5)?,
        expires_at: get_ts(row, 6)?,
        last_activity: get_ts(row, 7)?,
        is_active: row.get(8)?,
    })
}

impl Store {
    // ============================================
    // Users
    // ============================================

    pub fn insert_user(&self, user: &NewUser) -> StorageResult<User> {
        let now = fmt_ts(&Utc::now());
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO users (email, password_hash, name, role, created_by, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    user.email.trim().to_lowercase(),
                    user.password_hash,
                    user.name,
                    user.role,
                    user.created_by,
                    now,
                    now
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get_user(id)?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    pub fn get_user(&self, id: i64) -> StorageResult<Option<User>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))?;
        Ok(stmt.query_row(params![id], row_to_user).optional()?)
    }

    pub fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))?;
        Ok(stmt
            .query_row(params![email.trim().to_lowercase()], row_to_user)
            .optional()?)
    }

    pub fn get_user_by_firebase_uid(&self, uid: &str) -> StorageResult<Option<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM users WHERE firebase_uid = ?",
            USER_COLUMNS
        ))?;
        Ok(stmt.query_row(params![uid], row_to_user).optional()?)
    }

    pub fn list_users(&self) -> StorageResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_managers(&self) -> StorageResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM users WHERE role = 'MANAGER' ORDER BY id",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_users(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Persist every mutable field of `user` and bump updated_at
    pub fn save_user(&self, user: &User) -> StorageResult<User> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE users SET email = ?, password_hash = ?, name = ?, role = ?,
                    is_locked = ?, locked_until = ?, failed_attempts = ?,
                    last_failed_attempt_at = ?, firebase_uid = ?, firebase_synced = ?,
                    synced_at = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    user.email.trim().to_lowercase(),
                    user.password_hash,
                    user.name,
                    user.role,
                    user.is_locked,
                    fmt_opt_ts(&user.locked_until),
                    user.failed_attempts,
                    fmt_opt_ts(&user.last_failed_attempt_at),
                    user.firebase_uid,
                    user.firebase_synced,
                    fmt_opt_ts(&user.synced_at),
                    fmt_ts(&Utc::now()),
                    user.id
                ],
            )?
        };

        if changed == 0 {
            return Err(StorageError::NotFound(format!("user {}", user.id)));
        }

        self.get_user(user.id)?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", user.id)))
    }

    pub fn delete_user(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM users WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    /// Users changed locally since their last push
    pub fn list_unsynced_users(&self) -> StorageResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM users WHERE firebase_synced = 0 ORDER BY id",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn mark_user_synced(&self, id: i64, firebase_uid: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET firebase_uid = ?, firebase_synced = 1, synced_at = ? WHERE id = ?",
            params![firebase_uid, fmt_ts(&Utc::now()), id],
        )?;
        Ok(())
    }

    // ============================================
    // Sessions
    // ============================================

    pub fn create_session(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> StorageResult<Session> {
        let now = fmt_ts(&Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (user_id, token, ip_address, user_agent, created_at, expires_at, last_activity, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
            params![user_id, token, ip_address, user_agent, now, fmt_ts(&expires_at), now],
        )?;
        let id = conn.last_insert_rowid();

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sessions WHERE id = ?",
            SESSION_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_session)?)
    }

    pub fn get_session_by_token(&self, token: &str) -> StorageResult<Option<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sessions WHERE token = ?",
            SESSION_COLUMNS
        ))?;
        Ok(stmt.query_row(params![token], row_to_session).optional()?)
    }

    /// Most recent active, unexpired session of a user
    pub fn active_session_for_user(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sessions
             WHERE user_id = ? AND is_active = 1 AND expires_at > ?
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![user_id, fmt_ts(&now)], row_to_session)
            .optional()?)
    }

    pub fn touch_session(&self, id: i64, now: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET last_activity = ? WHERE id = ?",
            params![fmt_ts(&now), id],
        )?;
        Ok(())
    }

    /// Returns false when the token was unknown or already inactive
    pub fn deactivate_session(&self, token: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET is_active = 0 WHERE token = ? AND is_active = 1",
            params![token],
        )?;
        Ok(changed > 0)
    }

    pub fn deactivate_user_sessions(&self, user_id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET is_active = 0 WHERE user_id = ? AND is_active = 1",
            params![user_id],
        )?;
        Ok(changed)
    }

    pub fn deactivate_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET is_active = 0 WHERE is_active = 1 AND expires_at <= ?",
            params![fmt_ts(&now)],
        )?;
        Ok(changed)
    }

    // ============================================
    // Login attempts
    // ============================================

    pub fn record_login_attempt(
        &self,
        email: &str,
        user_id: Option<i64>,
        failure: Option<LoginFailure>,
        ip_address: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO login_attempts (email, user_id, success, failure_reason, ip_address, attempted_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                email.trim().to_lowercase(),
                user_id,
                failure.is_none(),
                failure,
                ip_address,
                fmt_ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    pub fn recent_login_attempts(&self, email: &str, limit: usize) -> StorageResult<Vec<LoginAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, email, user_id, success, failure_reason, ip_address, attempted_at
             FROM login_attempts WHERE email = ?
             ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![email.trim().to_lowercase(), limit as i64], |row| {
            Ok(LoginAttempt {
                id: row.get(0)?,
                email: row.get(1)?,
                user_id: row.get(2)?,
                success: row.get(3)?,
                failure_reason: row.get(4)?,
                ip_address: row.get(5)?,
                attempted_at: get_ts(row, 6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Role;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: "Rakoto".to_string(),
            role: Role::Utilisateur,
            created_by: None,
        }
    }

    #[test]
    fn test_insert_and_lookup_user() {
        let store = Store::open_in_memory().unwrap();
        let user = store.insert_user(&new_user("Rakoto@Example.MG")).unwrap();

        assert_eq!(user.email, "rakoto@example.mg");
        assert_eq!(user.role, Role::Utilisateur);
        assert!(!user.is_locked);

        let found = store.get_user_by_email("RAKOTO@example.mg").unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let store = Store::open_in_memory().unwrap();
        store.insert_user(&new_user("a@b.mg")).unwrap();
        let err = store.insert_user(&new_user("a@b.mg")).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn test_session_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let user = store.insert_user(&new_user("s@b.mg")).unwrap();
        let now = Utc::now();

        let session = store
            .create_session(user.id, "tok-1", now + Duration::minutes(30), None, None)
            .unwrap();
        assert!(session.is_valid(now));

        let active = store.active_session_for_user(user.id, now).unwrap();
        assert_eq!(active.map(|s| s.token), Some("tok-1".to_string()));

        assert!(store.deactivate_session("tok-1").unwrap());
        assert!(!store.deactivate_session("tok-1").unwrap());
        assert!(store.active_session_for_user(user.id, now).unwrap().is_none());
    }

    #[test]
    fn test_expired_sessions_are_swept() {
        let store = Store::open_in_memory().unwrap();
        let user = store.insert_user(&new_user("e@b.mg")).unwrap();
        let now = Utc::now();

        store
            .create_session(user.id, "old", now - Duration::minutes(1), None, None)
            .unwrap();
        store
            .create_session(user.id, "fresh", now + Duration::minutes(10), None, None)
            .unwrap();

        assert_eq!(store.deactivate_expired_sessions(now).unwrap(), 1);
        assert!(store.get_session_by_token("fresh").unwrap().unwrap().is_active);
    }

    #[test]
    fn test_login_attempts_recorded() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_login_attempt("x@b.mg", None, Some(LoginFailure::UserNotFound), Some("127.0.0.1"))
            .unwrap();

        let attempts = store.recent_login_attempts("x@b.mg", 10).unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].failure_reason, Some(LoginFailure::UserNotFound));
    }
}
