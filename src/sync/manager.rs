//! Sync Manager
//!
//! Drains the outbox toward the remote store (push) and folds remote
//! signalements into the local database (pull).
//!
//! Pull resolves conflicts by last-write-wins on `updated_at`: a remote
//! copy replaces the local row only when strictly newer, and a local row
//! with queued writes is never overwritten.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::client::RemoteStore;
use super::document::{
    entreprise_document, signalement_document, signalement_from_document, user_document,
    RemoteSignalement,
};
use super::{SyncError, SyncResult};
use crate::storage::{
    EntityType, QueueCounts, Signalement, Store, SyncAction, SyncHistory, SyncQueueEntry,
};

const PURGE_EVERY: Duration = Duration::from_secs(3600);

/// Processed outbox rows older than this are purged
const PURGE_RETENTION_HOURS: i64 = 24;

/// Tunables of the manager
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Outbox entries processed per push
    pub batch_size: usize,
    /// Seconds between background runs
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_secs: 300,
        }
    }
}

/// Outcome of one push, pull or full run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub direction: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pushed: u32,
    pub pulled: u32,
    pub conflicts: u32,
    pub skipped: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(direction: &str) -> Self {
        Self {
            direction: direction.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            pushed: 0,
            pulled: 0,
            conflicts: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncState {
    pub in_progress: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    pub enabled: bool,
    pub in_progress: bool,
    pub interval_secs: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
    pub last_error: Option<String>,
    pub pending: u64,
    pub failed: u64,
    pub queue: QueueCounts,
}

#[derive(Debug, PartialEq, Eq)]
enum PullOutcome {
    Applied,
    Unchanged,
    Conflict,
}

pub struct SyncManager {
    store: Store,
    remote: Arc<dyn RemoteStore>,
    settings: SyncSettings,
    state: RwLock<SyncState>,
    running: RwLock<bool>,
}

impl SyncManager {
    pub fn new(store: Store, remote: Arc<dyn RemoteStore>, settings: SyncSettings) -> Self {
        Self {
            store,
            remote,
            settings,
            state: RwLock::new(SyncState::default()),
            running: RwLock::new(false),
        }
    }

    /// Push due outbox entries
    pub async fn push(&self) -> SyncResult<SyncReport> {
        self.begin().await?;
        let mut report = SyncReport::new("PUSH");
        let result = self.push_into(&mut report).await;
        self.finish(report, result).await
    }

    /// Pull remote signalements
    pub async fn pull(&self) -> SyncResult<SyncReport> {
        self.begin().await?;
        let mut report = SyncReport::new("PULL");
        let result = self.pull_into(&mut report).await;
        self.finish(report, result).await
    }

    /// Push then pull
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        self.begin().await?;
        let mut report = SyncReport::new("BOTH");
        let mut result = self.push_into(&mut report).await;
        if result.is_ok() {
            result = self.pull_into(&mut report).await;
        }
        self.finish(report, result).await
    }

    pub async fn state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> SyncResult<SyncStatusReport> {
        let queue = self.store.sync_queue_counts()?;
        let state = self.state.read().await.clone();

        Ok(SyncStatusReport {
            enabled: true,
            in_progress: state.in_progress,
            interval_secs: self.settings.interval_secs,
            last_sync_at: state.last_sync_at,
            last_report: state.last_report,
            last_error: state.last_error,
            pending: queue.pending + queue.processing,
            failed: queue.failed,
            queue,
        })
    }

    /// Run `sync_all` every `interval_secs` and purge old outbox rows hourly
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self;

        tokio::spawn(async move {
            match manager.store.reset_processing_sync() {
                Ok(0) => {}
                Ok(n) => tracing::info!(entries = n, "Requeued interrupted sync entries"),
                Err(e) => tracing::warn!(error = %e, "Failed to requeue interrupted sync entries"),
            }

            *manager.running.write().await = true;
            let mut interval =
                tokio::time::interval(Duration::from_secs(manager.settings.interval_secs.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_purge = Instant::now();

            tracing::info!(interval_secs = manager.settings.interval_secs, "Sync ticker started");

            loop {
                interval.tick().await;

                if !*manager.running.read().await {
                    break;
                }

                match manager.sync_all().await {
                    Ok(report) if report.pushed + report.pulled + report.failed > 0 => {
                        tracing::info!(
                            pushed = report.pushed,
                            pulled = report.pulled,
                            conflicts = report.conflicts,
                            failed = report.failed,
                            "Scheduled sync finished"
                        );
                    }
                    Ok(_) => tracing::debug!("Scheduled sync: nothing to do"),
                    Err(SyncError::InProgress) => tracing::debug!("Scheduled sync skipped, run in progress"),
                    Err(e) => tracing::error!(error = %e, "Scheduled sync failed"),
                }

                if last_purge.elapsed() >= PURGE_EVERY {
                    manager.purge();
                    last_purge = Instant::now();
                }
            }

            tracing::info!("Sync ticker stopped");
        })
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Delete processed outbox rows older than the retention window
    pub fn purge(&self) -> usize {
        let before = Utc::now() - chrono::Duration::hours(PURGE_RETENTION_HOURS);
        match self.store.purge_sync_queue(before) {
            Ok(n) => {
                if n > 0 {
                    tracing::info!(purged = n, "Purged processed sync entries");
                }
                n
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to purge sync queue");
                0
            }
        }
    }

    // ============================================
    // Run bookkeeping
    // ============================================

    async fn begin(&self) -> SyncResult<()> {
        let mut state = self.state.write().await;
        if state.in_progress {
            return Err(SyncError::InProgress);
        }
        state.in_progress = true;
        Ok(())
    }

    async fn finish(&self, mut report: SyncReport, result: SyncResult<()>) -> SyncResult<SyncReport> {
        let finished_at = Utc::now();
        report.duration_ms = (finished_at - report.started_at).num_milliseconds().max(0) as u64;
        let error = result.as_ref().err().map(|e| e.to_string());

        let history = SyncHistory {
            id: 0,
            direction: report.direction.clone(),
            started_at: report.started_at,
            finished_at,
            duration_ms: report.duration_ms,
            pushed: report.pushed,
            pulled: report.pulled,
            conflicts: report.conflicts,
            failed: report.failed,
            error: error.clone(),
        };
        if let Err(e) = self.store.record_sync_history(&history) {
            tracing::warn!(error = %e, "Failed to record sync history");
        }

        {
            let mut state = self.state.write().await;
            state.in_progress = false;
            state.last_sync_at = Some(finished_at);
            state.last_report = Some(report.clone());
            state.last_error = error;
        }

        result.map(|_| report)
    }

    // ============================================
    // Push
    // ============================================

    async fn push_into(&self, report: &mut SyncReport) -> SyncResult<()> {
        let entries = self
            .store
            .due_sync_entries(Utc::now(), self.settings.batch_size)?;

        for entry in entries {
            self.store.mark_sync_processing(entry.id)?;

            match self.push_entry(&entry).await {
                Ok(true) => {
                    self.store.mark_sync_success(entry.id)?;
                    report.pushed += 1;
                }
                Ok(false) => {
                    self.store.mark_sync_success(entry.id)?;
                    report.skipped += 1;
                }
                Err(e) => {
                    let status = self
                        .store
                        .mark_sync_failed(entry.id, &e.to_string(), Utc::now())?;
                    tracing::warn!(
                        entry_id = entry.id,
                        entity = %entry.entity_type,
                        entity_id = entry.entity_id,
                        action = %entry.action,
                        status = %status,
                        error = %e,
                        "Sync push failed"
                    );
                    report.failed += 1;
                    report.errors.push(format!(
                        "{} {} {}: {}",
                        entry.action, entry.entity_type, entry.entity_id, e
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns false when there was nothing to write remotely
    async fn push_entry(&self, entry: &SyncQueueEntry) -> SyncResult<bool> {
        let collection = entry.entity_type.collection();

        if entry.action == SyncAction::Delete {
            let doc_id = entry
                .payload
                .as_ref()
                .and_then(|p| p.get("firebase_id"))
                .and_then(Value::as_str);
            let Some(doc_id) = doc_id else {
                return Ok(false);
            };
            self.remote.delete_document(collection, doc_id).await?;
            return Ok(true);
        }

        match entry.entity_type {
            EntityType::Signalement => {
                let Some(s) = self.store.get_signalement(entry.entity_id)? else {
                    return Ok(false);
                };
                let author_email = match s.user_id {
                    Some(uid) => self.store.get_user(uid)?.map(|u| u.email),
                    None => None,
                };
                let doc_id = s.firebase_id.clone().unwrap_or_else(new_document_id);
                self.remote
                    .put_document(collection, &doc_id, &signalement_document(&s, author_email.as_deref()))
                    .await?;
                self.store.mark_signalement_synced(s.id, &doc_id)?;
            }
            EntityType::User => {
                let Some(u) = self.store.get_user(entry.entity_id)? else {
                    return Ok(false);
                };
                let doc_id = u.firebase_uid.clone().unwrap_or_else(new_document_id);
                self.remote
                    .put_document(collection, &doc_id, &user_document(&u, &doc_id))
                    .await?;
                self.store.mark_user_synced(u.id, &doc_id)?;
            }
            EntityType::Entreprise => {
                let Some(e) = self.store.get_entreprise(entry.entity_id)? else {
                    return Ok(false);
                };
                self.remote
                    .put_document(collection, &e.id.to_string(), &entreprise_document(&e))
                    .await?;
            }
        }
        Ok(true)
    }

    // ============================================
    // Pull
    // ============================================

    async fn pull_into(&self, report: &mut SyncReport) -> SyncResult<()> {
        let documents = self
            .remote
            .list_documents(EntityType::Signalement.collection())
            .await?;

        for doc in documents {
            let remote = match signalement_from_document(&doc) {
                Ok(remote) => remote,
                Err(e) => {
                    tracing::warn!(document = %doc.id, error = %e, "Skipping malformed remote signalement");
                    report.failed += 1;
                    report.errors.push(format!("document {}: {}", doc.id, e));
                    continue;
                }
            };

            match self.apply_remote(remote)? {
                PullOutcome::Applied => report.pulled += 1,
                PullOutcome::Unchanged => report.skipped += 1,
                PullOutcome::Conflict => report.conflicts += 1,
            }
        }
        Ok(())
    }

    fn apply_remote(&self, remote: RemoteSignalement) -> SyncResult<PullOutcome> {
        let mut incoming = remote.signalement;
        let firebase_id = incoming
            .firebase_id
            .clone()
            .ok_or_else(|| SyncError::Encoding("remote signalement without id".into()))?;

        let Some(local) = self.store.get_signalement_by_firebase_id(&firebase_id)? else {
            if let Some(email) = &remote.user_email {
                incoming.user_id = self.store.get_user_by_email(email)?.map(|u| u.id);
            }
            let id = self.store.save_remote_signalement(&incoming)?;
            tracing::debug!(signalement_id = id, firebase_id = %firebase_id, "Remote signalement inserted");
            return Ok(PullOutcome::Applied);
        };

        if self.store.has_pending_sync(EntityType::Signalement, local.id)? {
            tracing::debug!(signalement_id = local.id, "Local changes pending, remote copy ignored");
            return Ok(PullOutcome::Conflict);
        }

        match incoming.updated_at.cmp(&local.updated_at) {
            Ordering::Greater => {
                self.store.save_remote_signalement(&incoming)?;
                tracing::debug!(signalement_id = local.id, "Remote signalement applied");
                Ok(PullOutcome::Applied)
            }
            _ if same_content(&local, &incoming) => Ok(PullOutcome::Unchanged),
            _ => {
                tracing::debug!(
                    signalement_id = local.id,
                    local_updated_at = %local.updated_at,
                    remote_updated_at = %incoming.updated_at,
                    "Local signalement kept over remote copy"
                );
                Ok(PullOutcome::Conflict)
            }
        }
    }
}

fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn same_content(a: &Signalement, b: &Signalement) -> bool {
    a.status == b.status
        && a.description == b.description
        && a.adresse == b.adresse
        && a.latitude == b.latitude
        && a.longitude == b.longitude
        && a.budget == b.budget
        && a.niveau == b.niveau
        && a.surface == b.surface
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewSignalement, QueueStatus, Statut};
    use crate::sync::document::{decode_fields, DocumentBuilder, RemoteDocument};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    /// In-memory stand-in for Firestore
    #[derive(Default)]
    struct MemoryRemote {
        docs: Mutex<BTreeMap<(String, String), Map<String, Value>>>,
        down: AtomicBool,
    }

    impl MemoryRemote {
        fn check(&self) -> SyncResult<()> {
            if self.down.load(AtomicOrdering::SeqCst) {
                Err(SyncError::Unavailable("503: backend error".into()))
            } else {
                Ok(())
            }
        }

        fn insert(&self, collection: &str, id: &str, fields: Map<String, Value>) {
            self.docs
                .lock()
                .unwrap()
                .insert((collection.to_string(), id.to_string()), fields);
        }

        fn len(&self, collection: &str) -> usize {
            self.docs
                .lock()
                .unwrap()
                .keys()
                .filter(|(c, _)| c == collection)
                .count()
        }

        fn field(&self, collection: &str, id: &str, key: &str) -> Option<Value> {
            self.docs
                .lock()
                .unwrap()
                .get(&(collection.to_string(), id.to_string()))
                .and_then(|f| f.get(key).cloned())
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryRemote {
        async fn put_document(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> SyncResult<()> {
            self.check()?;
            self.insert(collection, id, fields.clone());
            Ok(())
        }

        async fn get_document(&self, collection: &str, id: &str) -> SyncResult<Option<RemoteDocument>> {
            self.check()?;
            let fields = self
                .docs
                .lock()
                .unwrap()
                .get(&(collection.to_string(), id.to_string()))
                .cloned();
            fields
                .map(|f| -> SyncResult<RemoteDocument> {
                    Ok(RemoteDocument {
                        id: id.to_string(),
                        fields: decode_fields(&Value::Object(f))?,
                        update_time: None,
                    })
                })
                .transpose()
        }

        async fn list_documents(&self, collection: &str) -> SyncResult<Vec<RemoteDocument>> {
            self.check()?;
            let docs = self.docs.lock().unwrap().clone();
            docs.into_iter()
                .filter(|((c, _), _)| c == collection)
                .map(|((_, id), fields)| -> SyncResult<RemoteDocument> {
                    Ok(RemoteDocument {
                        id,
                        fields: decode_fields(&Value::Object(fields))?,
                        update_time: None,
                    })
                })
                .collect()
        }

        async fn delete_document(&self, collection: &str, id: &str) -> SyncResult<()> {
            self.check()?;
            self.docs
                .lock()
                .unwrap()
                .remove(&(collection.to_string(), id.to_string()));
            Ok(())
        }
    }

    fn setup() -> (Store, Arc<MemoryRemote>, SyncManager) {
        let store = Store::open_in_memory().unwrap();
        let remote = Arc::new(MemoryRemote::default());
        let manager = SyncManager::new(store.clone(), remote.clone(), SyncSettings::default());
        (store, remote, manager)
    }

    fn local_signalement(store: &Store, firebase_id: Option<&str>) -> Signalement {
        store
            .insert_signalement(
                &NewSignalement {
                    latitude: -18.8792,
                    longitude: 47.5079,
                    description: "Nid de poule".into(),
                    ..Default::default()
                },
                firebase_id,
            )
            .unwrap()
    }

    fn remote_signalement(description: &str, status: &str, updated_at: DateTime<Utc>) -> Map<String, Value> {
        DocumentBuilder::new()
            .double("latitude", Some(-18.8792))
            .double("longitude", Some(47.5079))
            .string("description", Some(description))
            .string("statusCode", Some(status))
            .timestamp("updatedAt", Some(&updated_at))
            .build()
    }

    fn enqueue(store: &Store, entity: EntityType, id: i64, action: SyncAction, payload: Option<Value>) {
        store
            .enqueue_sync(entity, id, action, payload.as_ref(), 5)
            .unwrap();
    }

    #[tokio::test]
    async fn test_push_writes_documents_and_marks_synced() {
        let (store, remote, manager) = setup();
        let s = local_signalement(&store, None);
        enqueue(&store, EntityType::Signalement, s.id, SyncAction::Create, None);

        let report = manager.push().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(remote.len("signalements"), 1);

        let synced = store.get_signalement(s.id).unwrap().unwrap();
        assert!(synced.firebase_synced);
        let doc_id = synced.firebase_id.unwrap();
        assert_eq!(
            remote.field("signalements", &doc_id, "statusCode"),
            Some(json!({"stringValue": "NOUVEAU"}))
        );

        // nothing left to push
        assert_eq!(manager.push().await.unwrap().pushed, 0);
        assert_eq!(store.sync_queue_counts().unwrap().success, 1);
    }

    #[tokio::test]
    async fn test_push_failure_schedules_retry() {
        let (store, remote, manager) = setup();
        let s = local_signalement(&store, None);
        enqueue(&store, EntityType::Signalement, s.id, SyncAction::Create, None);

        remote.down.store(true, AtomicOrdering::SeqCst);
        let report = manager.push().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);

        let entries = store.list_sync_entries(Some(QueueStatus::Pending), 10).unwrap();
        assert_eq!(entries[0].retry_count, 1);
        assert!(entries[0].next_retry_at.unwrap() > Utc::now());

        // not due yet even once the remote is back
        remote.down.store(false, AtomicOrdering::SeqCst);
        assert_eq!(manager.push().await.unwrap().pushed, 0);
        assert_eq!(remote.len("signalements"), 0);
    }

    #[tokio::test]
    async fn test_delete_and_vanished_entities() {
        let (store, remote, manager) = setup();
        remote.insert("signalements", "fs-9", remote_signalement("x", "nouveau", Utc::now()));

        enqueue(
            &store,
            EntityType::Signalement,
            9,
            SyncAction::Delete,
            Some(json!({"firebase_id": "fs-9"})),
        );
        // UPDATE of a row deleted since: skipped, not failed
        enqueue(&store, EntityType::Entreprise, 404, SyncAction::Update, None);

        let report = manager.push().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(remote.len("signalements"), 0);
    }

    #[tokio::test]
    async fn test_pull_inserts_new_remote_signalements() {
        let (store, remote, manager) = setup();
        let mut doc = remote_signalement("Route inondée", "en_cours", Utc::now());
        doc.insert("userEmail".into(), json!({"stringValue": "ghost@example.mg"}));
        remote.insert("signalements", "mobile-1", doc);

        let report = manager.pull().await.unwrap();
        assert_eq!(report.pulled, 1);

        let s = store.get_signalement_by_firebase_id("mobile-1").unwrap().unwrap();
        assert_eq!(s.status, Statut::EnCours);
        assert_eq!(s.description, "Route inondée");
        assert_eq!(s.user_id, None);
        assert!(s.firebase_synced);
    }

    #[tokio::test]
    async fn test_pull_last_write_wins() {
        let (store, remote, manager) = setup();
        let newer = local_signalement(&store, Some("fs-newer"));
        let older = local_signalement(&store, Some("fs-older"));

        remote.insert(
            "signalements",
            "fs-newer",
            remote_signalement("Réparé", "TERMINE", newer.updated_at + ChronoDuration::hours(1)),
        );
        remote.insert(
            "signalements",
            "fs-older",
            remote_signalement("Ancienne version", "nouveau", older.updated_at - ChronoDuration::days(1)),
        );

        let report = manager.pull().await.unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.conflicts, 1);

        let applied = store.get_signalement(newer.id).unwrap().unwrap();
        assert_eq!(applied.description, "Réparé");
        assert_eq!(applied.status, Statut::Termine);
        assert_eq!(store.latest_history(newer.id).unwrap().unwrap().nouveau_status, Statut::Termine);

        let kept = store.get_signalement(older.id).unwrap().unwrap();
        assert_eq!(kept.description, "Nid de poule");
    }

    #[tokio::test]
    async fn test_pull_tie_keeps_local() {
        let (store, remote, manager) = setup();
        let s = local_signalement(&store, Some("fs-tie"));

        remote.insert(
            "signalements",
            "fs-tie",
            remote_signalement("Version concurrente", "EN_COURS", s.updated_at),
        );

        let report = manager.pull().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.pulled, 0);

        let kept = store.get_signalement(s.id).unwrap().unwrap();
        assert_eq!(kept.description, "Nid de poule");
        assert_eq!(kept.status, Statut::Nouveau);
    }

    #[tokio::test]
    async fn test_pull_never_overwrites_pending_local_changes() {
        let (store, remote, manager) = setup();
        let s = local_signalement(&store, Some("fs-1"));
        enqueue(&store, EntityType::Signalement, s.id, SyncAction::Update, None);

        remote.insert(
            "signalements",
            "fs-1",
            remote_signalement("Remote edit", "en_cours", s.updated_at + ChronoDuration::hours(2)),
        );

        let report = manager.pull().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.pulled, 0);
        assert_eq!(store.get_signalement(s.id).unwrap().unwrap().description, "Nid de poule");
    }

    #[tokio::test]
    async fn test_sync_all_records_history_and_state() {
        let (store, _remote, manager) = setup();
        let s = local_signalement(&store, None);
        enqueue(&store, EntityType::Signalement, s.id, SyncAction::Create, None);

        let report = manager.sync_all().await.unwrap();
        assert_eq!(report.direction, "BOTH");
        assert_eq!(report.pushed, 1);
        // the document just pushed comes back identical
        assert_eq!(report.pulled, 0);
        assert_eq!(report.conflicts, 0);

        let history = store.latest_sync_history().unwrap().unwrap();
        assert_eq!(history.direction, "BOTH");
        assert_eq!(history.pushed, 1);

        let status = manager.status().await.unwrap();
        assert!(status.enabled);
        assert!(!status.in_progress);
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_pull_failure_is_recorded() {
        let (store, remote, manager) = setup();
        remote.down.store(true, AtomicOrdering::SeqCst);

        assert!(matches!(manager.pull().await, Err(SyncError::Unavailable(_))));
        let state = manager.state().await;
        assert!(!state.in_progress);
        assert!(state.last_error.is_some());
        assert!(store.latest_sync_history().unwrap().unwrap().error.is_some());
    }
}
