//! Sync outbox and run history

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use super::types::{EntityType, QueueStatus, SyncAction, SyncDirection, SyncHistory, SyncQueueEntry};
use super::{fmt_opt_ts, fmt_ts, get_opt_ts, get_ts, Store};

/// Default priority of an outbox entry (lower runs first)
pub const DEFAULT_PRIORITY: i32 = 5;

/// Default number of attempts before an entry is marked FAILED
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay unit between attempts, multiplied by the retry count
pub const RETRY_STEP_MINUTES: i64 = 5;

const QUEUE_COLUMNS: &str = "id, entity_type, entity_id, action, direction, payload, status,
    priority, retry_count, max_retries, last_error, next_retry_at, created_at, processed_at";

const HISTORY_COLUMNS: &str =
    "id, direction, started_at, finished_at, duration_ms, pushed, pulled, conflicts, failed, error";

/// Number of outbox entries per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub cancelled: u64,
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<SyncQueueEntry> {
    let payload: Option<String> = row.get(5)?;
    let payload = payload
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(SyncQueueEntry {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        action: row.get(3)?,
        direction: row.get(4)?,
        payload,
        status: row.get(6)?,
        priority: row.get(7)?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        last_error: row.get(10)?,
        next_retry_at: get_opt_ts(row, 11)?,
        created_at: get_ts(row, 12)?,
        processed_at: get_opt_ts(row, 13)?,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<SyncHistory> {
    let duration_ms: i64 = row.get(4)?;
    Ok(SyncHistory {
        id: row.get(0)?,
        direction: row.get(1)?,
        started_at: get_ts(row, 2)?,
        finished_at: get_ts(row, 3)?,
        duration_ms: duration_ms.max(0) as u64,
        pushed: row.get(5)?,
        pulled: row.get(6)?,
        conflicts: row.get(7)?,
        failed: row.get(8)?,
        error: row.get(9)?,
    })
}

impl Store {
    /// Append a PUSH entry to the outbox.
    ///
    /// A pending UPDATE for the same entity absorbs a new UPDATE (the payload
    /// is replaced) so bursts of edits produce a single remote write.
    pub fn enqueue_sync(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        action: SyncAction,
        payload: Option<&serde_json::Value>,
        priority: i32,
    ) -> StorageResult<SyncQueueEntry> {
        let payload = payload.map(serde_json::to_string).transpose()?;
        let now = fmt_ts(&Utc::now());

        let id = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;

            let existing: Option<i64> = if action == SyncAction::Update {
                tx.query_row(
                    "SELECT id FROM sync_queue
                     WHERE entity_type = ? AND entity_id = ? AND action = ? AND status = ?
                     ORDER BY id DESC LIMIT 1",
                    params![entity_type, entity_id, SyncAction::Update, QueueStatus::Pending],
                    |row| row.get(0),
                )
                .optional()?
            } else {
                None
            };

            let id = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE sync_queue SET payload = ?, priority = MIN(priority, ?) WHERE id = ?",
                        params![payload, priority, id],
                    )?;
                    id
                }
                None => {
                    tx.execute(
                        "INSERT INTO sync_queue (entity_type, entity_id, action, direction, payload,
                            status, priority, retry_count, max_retries, created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
                        params![
                            entity_type,
                            entity_id,
                            action,
                            SyncDirection::Push,
                            payload,
                            QueueStatus::Pending,
                            priority,
                            DEFAULT_MAX_RETRIES,
                            now
                        ],
                    )?;
                    tx.last_insert_rowid()
                }
            };

            tx.commit()?;
            id
        };

        self.get_sync_entry(id)?
            .ok_or_else(|| StorageError::NotFound(format!("sync entry {}", id)))
    }

    pub fn get_sync_entry(&self, id: i64) -> StorageResult<Option<SyncQueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sync_queue WHERE id = ?",
            QUEUE_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], row_to_entry).optional()?)
    }

    /// PENDING entries whose retry time has come, by priority then id
    pub fn due_sync_entries(&self, now: DateTime<Utc>, limit: usize) -> StorageResult<Vec<SyncQueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sync_queue
             WHERE status = ? AND (next_retry_at IS NULL OR next_retry_at <= ?)
             ORDER BY priority ASC, id ASC
             LIMIT ?",
            QUEUE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![QueueStatus::Pending, fmt_ts(&now), limit as i64],
            row_to_entry,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_sync_entries(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> StorageResult<Vec<SyncQueueEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sync_queue WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2",
            QUEUE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status, limit as i64], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn mark_sync_processing(&self, id: i64) -> StorageResult<()> {
        self.set_queue_status(id, QueueStatus::Processing, None)
    }

    pub fn mark_sync_success(&self, id: i64) -> StorageResult<()> {
        self.set_queue_status(id, QueueStatus::Success, Some(Utc::now()))
    }

    /// Record a failed attempt. The entry goes back to PENDING with
    /// `next_retry_at = now + retry_count × 5 min`, or to FAILED once
    /// `retry_count` reaches `max_retries`. Returns the new status.
    pub fn mark_sync_failed(&self, id: i64, error: &str, now: DateTime<Utc>) -> StorageResult<QueueStatus> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let (retry_count, max_retries): (u32, u32) = tx
            .query_row(
                "SELECT retry_count, max_retries FROM sync_queue WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("sync entry {}", id)))?;

        let retry_count = retry_count + 1;
        let (status, next_retry_at, processed_at) = if retry_count >= max_retries {
            (QueueStatus::Failed, None, Some(now))
        } else {
            let delay = Duration::minutes(RETRY_STEP_MINUTES * i64::from(retry_count));
            (QueueStatus::Pending, Some(now + delay), None)
        };

        tx.execute(
            "UPDATE sync_queue SET status = ?, retry_count = ?, last_error = ?, next_retry_at = ?,
                processed_at = ?
             WHERE id = ?",
            params![
                status,
                retry_count,
                error,
                fmt_opt_ts(&next_retry_at),
                fmt_opt_ts(&processed_at),
                id
            ],
        )?;
        tx.commit()?;

        Ok(status)
    }

    /// Cancel a PENDING or FAILED entry
    pub fn cancel_sync_entry(&self, id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_queue SET status = ?, processed_at = ? WHERE id = ? AND status IN (?, ?)",
            params![
                QueueStatus::Cancelled,
                fmt_ts(&Utc::now()),
                id,
                QueueStatus::Pending,
                QueueStatus::Failed
            ],
        )?;
        Ok(changed > 0)
    }

    /// Cancel every pending write for an entity (used before a DELETE is queued)
    pub fn cancel_pending_sync_for(&self, entity_type: EntityType, entity_id: i64) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE sync_queue SET status = ?, processed_at = ?
             WHERE entity_type = ? AND entity_id = ? AND status = ?",
            params![
                QueueStatus::Cancelled,
                fmt_ts(&Utc::now()),
                entity_type,
                entity_id,
                QueueStatus::Pending
            ],
        )?)
    }

    /// Whether an entity still has writes waiting to be pushed
    pub fn has_pending_sync(&self, entity_type: EntityType, entity_id: i64) -> StorageResult<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_queue
                WHERE entity_type = ? AND entity_id = ? AND status IN (?, ?))",
            params![entity_type, entity_id, QueueStatus::Pending, QueueStatus::Processing],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Put entries left in PROCESSING (interrupted run) back to PENDING
    pub fn reset_processing_sync(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE sync_queue SET status = ? WHERE status = ?",
            params![QueueStatus::Pending, QueueStatus::Processing],
        )?)
    }

    pub fn sync_queue_counts(&self) -> StorageResult<QueueCounts> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, QueueStatus>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            match status {
                QueueStatus::Pending => counts.pending = count,
                QueueStatus::Processing => counts.processing = count,
                QueueStatus::Success => counts.success = count,
                QueueStatus::Failed => counts.failed = count,
                QueueStatus::Cancelled => counts.cancelled = count,
            }
        }
        Ok(counts)
    }

    /// Delete SUCCESS and CANCELLED entries processed before `before`
    pub fn purge_sync_queue(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM sync_queue WHERE status IN (?, ?) AND processed_at IS NOT NULL AND processed_at < ?",
            params![QueueStatus::Success, QueueStatus::Cancelled, fmt_ts(&before)],
        )?)
    }

    pub fn record_sync_history(&self, history: &SyncHistory) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_history (direction, started_at, finished_at, duration_ms, pushed,
                pulled, conflicts, failed, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                history.direction,
                fmt_ts(&history.started_at),
                fmt_ts(&history.finished_at),
                history.duration_ms as i64,
                history.pushed,
                history.pulled,
                history.conflicts,
                history.failed,
                history.error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_sync_history(&self) -> StorageResult<Option<SyncHistory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sync_history ORDER BY id DESC LIMIT 1",
            HISTORY_COLUMNS
        ))?;
        Ok(stmt.query_row([], row_to_history).optional()?)
    }

    pub fn list_sync_history(&self, limit: usize) -> StorageResult<Vec<SyncHistory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM sync_history ORDER BY id DESC LIMIT ?",
            HISTORY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_history)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn set_queue_status(
        &self,
        id: i64,
        status: QueueStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_queue SET status = ?, processed_at = COALESCE(?, processed_at) WHERE id = ?",
            params![status, fmt_opt_ts(&processed_at), id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("sync entry {}", id)));
        }
        Ok(())
    }
}
