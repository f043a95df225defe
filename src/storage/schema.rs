//! Database schema
//!
//! Every statement is idempotent so `migrate` runs on each open.
//! Timestamps are RFC 3339 UTC strings with millisecond precision,
//! which keeps lexical and chronological order identical.

use rusqlite::{params, Connection};

use super::error::StorageResult;
use super::types::{Role, Statut};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS roles (
    code TEXT PRIMARY KEY,
    libelle TEXT NOT NULL,
    niveau_acces INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS signalement_status (
    code TEXT PRIMARY KEY,
    libelle TEXT NOT NULL,
    ordre INTEGER NOT NULL,
    couleur TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    name TEXT NOT NULL,
    role TEXT NOT NULL REFERENCES roles(code),
    is_locked INTEGER NOT NULL DEFAULT 0,
    locked_until TEXT,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    last_failed_attempt_at TEXT,
    firebase_uid TEXT,
    firebase_synced INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT,
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token TEXT NOT NULL UNIQUE,
    ip_address TEXT,
    user_agent TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, is_active);

CREATE TABLE IF NOT EXISTS login_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    success INTEGER NOT NULL,
    failure_reason TEXT,
    ip_address TEXT,
    attempted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_login_attempts_email ON login_attempts(email, attempted_at);

CREATE TABLE IF NOT EXISTS entreprises (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nom TEXT NOT NULL UNIQUE,
    siret TEXT UNIQUE,
    telephone TEXT,
    email TEXT,
    adresse TEXT,
    specialites TEXT NOT NULL DEFAULT '[]',
    is_active INTEGER NOT NULL DEFAULT 1,
    note_moyenne REAL,
    nombre_interventions INTEGER NOT NULL DEFAULT 0,
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS signalements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    adresse TEXT,
    description TEXT NOT NULL,
    budget REAL,
    niveau INTEGER,
    surface REAL,
    entreprise_id INTEGER REFERENCES entreprises(id) ON DELETE SET NULL,
    status TEXT NOT NULL REFERENCES signalement_status(code),
    date_signalement TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    firebase_id TEXT UNIQUE,
    firebase_synced INTEGER NOT NULL DEFAULT 0,
    last_sync_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_signalements_status ON signalements(status);
CREATE INDEX IF NOT EXISTS idx_signalements_date ON signalements(date_signalement);
CREATE INDEX IF NOT EXISTS idx_signalements_position ON signalements(latitude, longitude);

CREATE TABLE IF NOT EXISTS historique_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signalement_id INTEGER NOT NULL REFERENCES signalements(id) ON DELETE CASCADE,
    ancien_status TEXT,
    nouveau_status TEXT NOT NULL,
    commentaire TEXT,
    changed_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    changed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_historique_signalement ON historique_status(signalement_id, changed_at);

CREATE TABLE IF NOT EXISTS photos_signalement (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signalement_id INTEGER NOT NULL REFERENCES signalements(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    description TEXT,
    ordre INTEGER NOT NULL,
    is_principale INTEGER NOT NULL DEFAULT 0,
    uploaded_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_photos_signalement ON photos_signalement(signalement_id, ordre);

CREATE TABLE IF NOT EXISTS signalement_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signalement_id INTEGER NOT NULL REFERENCES signalements(id) ON DELETE CASCADE,
    entreprise_id INTEGER REFERENCES entreprises(id) ON DELETE SET NULL,
    surface_m2 REAL,
    budget REAL,
    date_debut_travaux TEXT,
    date_fin_prevue TEXT,
    date_fin_reelle TEXT,
    description_travaux TEXT,
    materiel_utilise TEXT,
    travaux_conformes INTEGER,
    commentaire_fin TEXT,
    photos_avant TEXT NOT NULL DEFAULT '[]',
    photos_apres TEXT NOT NULL DEFAULT '[]',
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    modified_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_actions_signalement ON signalement_actions(signalement_id);
CREATE INDEX IF NOT EXISTS idx_actions_entreprise ON signalement_actions(entreprise_id);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    signalement_id INTEGER REFERENCES signalements(id) ON DELETE SET NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    old_status TEXT,
    new_status TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read);

CREATE TABLE IF NOT EXISTS configurations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cle TEXT NOT NULL UNIQUE,
    valeur TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'STRING',
    description TEXT,
    updated_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    direction TEXT NOT NULL,
    payload TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING',
    priority INTEGER NOT NULL DEFAULT 5,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    next_retry_at TEXT,
    created_at TEXT NOT NULL,
    processed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_sync_queue_due ON sync_queue(status, next_retry_at, priority);
CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id, status);

CREATE TABLE IF NOT EXISTS sync_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    direction TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    pushed INTEGER NOT NULL DEFAULT 0,
    pulled INTEGER NOT NULL DEFAULT 0,
    conflicts INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    error TEXT
);
";

/// Create all tables and indexes if they are missing, then make sure the
/// role and status reference rows exist.
pub fn migrate(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(SCHEMA)?;

    let mut role_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO roles (code, libelle, niveau_acces) VALUES (?, ?, ?)",
    )?;
    for role in Role::ALL {
        role_stmt.execute(params![role.as_str(), role.libelle(), role.niveau_acces()])?;
    }

    let mut status_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO signalement_status (code, libelle, ordre, couleur)
         VALUES (?, ?, ?, ?)",
    )?;
    for statut in Statut::ALL {
        status_stmt.execute(params![
            statut.as_str(),
            statut.libelle(),
            statut.ordre(),
            statut.couleur()
        ])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 14);

        let statuses: i64 = conn
            .query_row("SELECT COUNT(*) FROM signalement_status", [], |row| row.get(0))
            .unwrap();
        assert_eq!(statuses, 4);
    }
}
