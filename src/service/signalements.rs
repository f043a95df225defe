//! Signalement lifecycle
//!
//! Creation, edits, status transitions, proximity search and the
//! aggregate statistics shown on the public map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::storage::sync_queue::DEFAULT_PRIORITY;
use crate::storage::{
    EntityType, HistoriqueStatus, NewNotification, NewSignalement, NotificationType, Signalement,
    SignalementFilter, Statut, Store, SyncAction, User,
};
use crate::websocket::WsEvent;

use super::budget::{round1, BudgetService, NIVEAU_MAX, NIVEAU_MIN};
use super::error::{not_found, ServiceError, ServiceResult};
use super::geo::{bounding_box, haversine_km, valid_coordinates, DEFAULT_RADIUS_KM};
use super::notifier::{Notifier, TITLE_NEW_SIGNALEMENT, TITLE_STATUS_UPDATE};

/// Payload accepted when reporting a road defect
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalementInput {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub adresse: Option<String>,
    pub description: String,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub niveau: Option<u8>,
    #[serde(default)]
    pub surface: Option<f64>,
    #[serde(default)]
    pub entreprise_id: Option<i64>,
    #[serde(default)]
    pub date_signalement: Option<DateTime<Utc>>,
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalementUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub adresse: Option<String>,
    pub description: Option<String>,
    pub budget: Option<f64>,
    pub niveau: Option<u8>,
    pub surface: Option<f64>,
    pub entreprise_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbySignalement {
    #[serde(flatten)]
    pub signalement: Signalement,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SignalementStatistics {
    pub total: u64,
    pub total_surface: f64,
    pub total_budget: f64,
    pub nouveau: u64,
    pub en_cours: u64,
    pub termine: u64,
    pub annule: u64,
    /// Share of termine signalements, in percent with one decimal
    pub avancement: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOption {
    pub code: Statut,
    pub libelle: &'static str,
    pub ordre: u8,
    pub couleur: &'static str,
}

#[derive(Clone)]
pub struct SignalementService {
    store: Store,
    budget: BudgetService,
    notifier: Notifier,
}

impl SignalementService {
    pub fn new(store: Store, budget: BudgetService, notifier: Notifier) -> Self {
        Self {
            store,
            budget,
            notifier,
        }
    }

    pub fn create(&self, author: Option<&User>, input: SignalementInput) -> ServiceResult<Signalement> {
        validate_position(input.latitude, input.longitude)?;
        let description = input.description.trim();
        if description.is_empty() {
            return Err(ServiceError::Validation("description is required".into()));
        }
        validate_works_fields(input.niveau, input.surface, input.budget)?;

        let budget = match (input.budget, input.niveau, input.surface) {
            (Some(b), _, _) => Some(b),
            (None, Some(niveau), Some(surface)) => Some(self.budget.calculer_budget(niveau, surface)?.budget),
            _ => None,
        };

        let signalement = self.store.insert_signalement(
            &NewSignalement {
                user_id: author.map(|u| u.id),
                latitude: input.latitude,
                longitude: input.longitude,
                adresse: clean(input.adresse),
                description: description.to_string(),
                budget,
                niveau: input.niveau,
                surface: input.surface,
                entreprise_id: input.entreprise_id,
                status: None,
                date_signalement: input.date_signalement,
            },
            None,
        )?;

        self.store.enqueue_sync(
            EntityType::Signalement,
            signalement.id,
            SyncAction::Create,
            None,
            DEFAULT_PRIORITY,
        )?;

        let message = format!("Nouveau signalement: {}", excerpt(&signalement.description, 80));
        if let Err(e) = self.notifier.notify_managers(
            NotificationType::Info,
            TITLE_NEW_SIGNALEMENT,
            &message,
            Some(signalement.id),
        ) {
            tracing::warn!(error = %e, "Failed to notify managers");
        }
        self.notifier.publish(WsEvent::signalement_created(&signalement));

        tracing::info!(
            signalement_id = signalement.id,
            user_id = ?signalement.user_id,
            "Signalement created"
        );
        Ok(signalement)
    }

    pub fn get(&self, id: i64) -> ServiceResult<Signalement> {
        self.store
            .get_signalement(id)?
            .ok_or_else(|| not_found("signalement", id))
    }

    pub fn list(&self, filter: &SignalementFilter) -> ServiceResult<Vec<Signalement>> {
        Ok(self.store.list_signalements(filter)?)
    }

    pub fn list_by_status(&self, status: Statut) -> ServiceResult<Vec<Signalement>> {
        self.list(&SignalementFilter::new().status(status))
    }

    /// Only the author or a manager may edit
    pub fn update(&self, actor: &User, id: i64, input: SignalementUpdate) -> ServiceResult<Signalement> {
        let mut s = self.get(id)?;
        ensure_owner_or_manager(actor, &s)?;

        if let Some(lat) = input.latitude {
            s.latitude = lat;
        }
        if let Some(lng) = input.longitude {
            s.longitude = lng;
        }
        validate_position(s.latitude, s.longitude)?;

        if let Some(description) = input.description {
            let description = description.trim();
            if description.is_empty() {
                return Err(ServiceError::Validation("description cannot be empty".into()));
            }
            s.description = description.to_string();
        }
        if input.adresse.is_some() {
            s.adresse = clean(input.adresse);
        }
        if input.entreprise_id.is_some() {
            s.entreprise_id = input.entreprise_id;
        }

        validate_works_fields(input.niveau, input.surface, input.budget)?;
        let dimensions_changed = input.niveau.is_some() || input.surface.is_some();
        if let Some(niveau) = input.niveau {
            s.niveau = Some(niveau);
        }
        if let Some(surface) = input.surface {
            s.surface = Some(surface);
        }
        match (input.budget, s.niveau, s.surface) {
            (Some(budget), _, _) => s.budget = Some(budget),
            (None, Some(niveau), Some(surface)) if dimensions_changed => {
                s.budget = Some(self.budget.calculer_budget(niveau, surface)?.budget);
            }
            _ => {}
        }

        let saved = self.store.save_signalement(&s)?;
        self.store.enqueue_sync(
            EntityType::Signalement,
            saved.id,
            SyncAction::Update,
            None,
            DEFAULT_PRIORITY,
        )?;
        Ok(saved)
    }

    /// Remove a signalement. A remote copy is deleted on the next push.
    pub fn delete(&self, actor: &User, id: i64) -> ServiceResult<()> {
        let s = self.get(id)?;
        ensure_owner_or_manager(actor, &s)?;

        self.store.cancel_pending_sync_for(EntityType::Signalement, id)?;
        self.store.delete_signalement(id)?;

        if let Some(firebase_id) = &s.firebase_id {
            self.store.enqueue_sync(
                EntityType::Signalement,
                id,
                SyncAction::Delete,
                Some(&json!({ "firebase_id": firebase_id })),
                DEFAULT_PRIORITY,
            )?;
        }

        tracing::info!(signalement_id = id, by = actor.id, "Signalement deleted");
        Ok(())
    }

    /// Move a signalement to `new_status`.
    ///
    /// Same status is a no-op. Forward transitions follow
    /// [`Statut::can_transition_to`]; a manager may force any other move.
    /// A non-manager may only cancel their own signalement.
    pub fn change_status(
        &self,
        actor: &User,
        id: i64,
        new_status: Statut,
        commentaire: Option<&str>,
    ) -> ServiceResult<Signalement> {
        let current = self.get(id)?;
        if current.status == new_status {
            return Ok(current);
        }

        if !actor.is_manager() {
            let own_cancel = new_status == Statut::Annule && current.user_id == Some(actor.id);
            if !own_cancel {
                return Err(ServiceError::Forbidden("manager role required to change status".into()));
            }
        }
        if !current.status.can_transition_to(new_status) && !actor.is_manager() {
            return Err(ServiceError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let commentaire = commentaire.map(str::trim).filter(|c| !c.is_empty());
        let updated =
            self.store
                .set_signalement_status(id, current.status, new_status, commentaire, Some(actor.id))?;
        self.store.enqueue_sync(
            EntityType::Signalement,
            id,
            SyncAction::Update,
            None,
            DEFAULT_PRIORITY,
        )?;

        if let Some(owner) = updated.user_id.filter(|owner| *owner != actor.id) {
            self.notifier.send_quietly(
                NewNotification::new(
                    owner,
                    NotificationType::StatusChange,
                    TITLE_STATUS_UPDATE,
                    format!(
                        "Votre signalement est passé de \"{}\" à \"{}\"",
                        current.status.libelle(),
                        new_status.libelle()
                    ),
                )
                .signalement(id)
                .transition(current.status, new_status),
            );
        }
        self.notifier
            .publish(WsEvent::status_changed(id, current.status, new_status));

        tracing::info!(
            signalement_id = id,
            from = %current.status,
            to = %new_status,
            by = actor.id,
            "Status changed"
        );
        Ok(updated)
    }

    /// Signalements within `radius_km` (default 5), nearest first
    pub fn find_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_km: Option<f64>,
    ) -> ServiceResult<Vec<NearbySignalement>> {
        validate_position(lat, lng)?;
        let radius = radius_km.unwrap_or(DEFAULT_RADIUS_KM);
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ServiceError::Validation("radius must be greater than 0".into()));
        }

        let (min_lat, max_lat, min_lng, max_lng) = bounding_box(lat, lng, radius);
        let mut nearby: Vec<NearbySignalement> = self
            .store
            .list_signalements_in_bounds(min_lat, max_lat, min_lng, max_lng)?
            .into_iter()
            .filter_map(|s| {
                let distance_km = haversine_km(lat, lng, s.latitude, s.longitude);
                (distance_km <= radius).then_some(NearbySignalement {
                    signalement: s,
                    distance_km,
                })
            })
            .collect();

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(nearby)
    }

    pub fn statistics(&self) -> ServiceResult<SignalementStatistics> {
        let totals = self.store.signalement_totals()?;
        let termine = totals.count(Statut::Termine);
        let avancement = if totals.total == 0 {
            0.0
        } else {
            round1(termine as f64 / totals.total as f64 * 100.0)
        };

        Ok(SignalementStatistics {
            total: totals.total,
            total_surface: totals.total_surface,
            total_budget: totals.total_budget,
            nouveau: totals.count(Statut::Nouveau),
            en_cours: totals.count(Statut::EnCours),
            termine,
            annule: totals.count(Statut::Annule),
            avancement,
        })
    }

    pub fn status_options(&self) -> Vec<StatusOption> {
        Statut::ALL
            .iter()
            .map(|s| StatusOption {
                code: *s,
                libelle: s.libelle(),
                ordre: s.ordre(),
                couleur: s.couleur(),
            })
            .collect()
    }

    // history

    pub fn history(&self, signalement_id: i64) -> ServiceResult<Vec<HistoriqueStatus>> {
        self.get(signalement_id)?;
        Ok(self.store.list_history(signalement_id)?)
    }

    pub fn latest_history(&self, signalement_id: i64) -> ServiceResult<HistoriqueStatus> {
        self.store
            .latest_history(signalement_id)?
            .ok_or_else(|| not_found("history of signalement", signalement_id))
    }

    pub fn get_history(&self, id: i64) -> ServiceResult<HistoriqueStatus> {
        self.store.get_history(id)?.ok_or_else(|| not_found("history", id))
    }

    pub fn delete_history(&self, actor: &User, id: i64) -> ServiceResult<()> {
        if !actor.is_manager() {
            return Err(ServiceError::Forbidden("manager role required".into()));
        }
        if !self.store.delete_history(id)? {
            return Err(not_found("history", id));
        }
        Ok(())
    }
}

fn validate_position(lat: f64, lng: f64) -> ServiceResult<()> {
    if !valid_coordinates(lat, lng) {
        return Err(ServiceError::Validation(format!(
            "invalid coordinates ({}, {}): latitude must be in [-90, 90] and longitude in [-180, 180]",
            lat, lng
        )));
    }
    Ok(())
}

fn validate_works_fields(niveau: Option<u8>, surface: Option<f64>, budget: Option<f64>) -> ServiceResult<()> {
    if let Some(n) = niveau {
        if !(NIVEAU_MIN..=NIVEAU_MAX).contains(&n) {
            return Err(ServiceError::Validation(format!(
                "niveau must be between {} and {}",
                NIVEAU_MIN, NIVEAU_MAX
            )));
        }
    }
    if let Some(s) = surface {
        if !s.is_finite() || s <= 0.0 {
            return Err(ServiceError::Validation("surface must be greater than 0".into()));
        }
    }
    if let Some(b) = budget {
        if !b.is_finite() || b < 0.0 {
            return Err(ServiceError::Validation("budget cannot be negative".into()));
        }
    }
    Ok(())
}

fn ensure_owner_or_manager(actor: &User, s: &Signalement) -> ServiceResult<()> {
    if actor.is_manager() || s.user_id == Some(actor.id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden("signalement belongs to another user".into()))
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{citizen, manager};
    use crate::storage::signalements::CREATION_COMMENT;
    use crate::storage::QueueStatus;

    fn service(store: &Store) -> SignalementService {
        let notifier = Notifier::new(store.clone(), None);
        SignalementService::new(store.clone(), BudgetService::new(store.clone(), 10_000.0), notifier)
    }

    fn input(description: &str) -> SignalementInput {
        SignalementInput {
            latitude: -18.8792,
            longitude: 47.5079,
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_records_history_and_outbox() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let user = citizen(&store, "rabe@example.mg");
        let svc = service(&store);

        let s = svc.create(Some(&user), input("  Nid de poule  ")).unwrap();
        assert_eq!(s.status, Statut::Nouveau);
        assert_eq!(s.description, "Nid de poule");

        let history = svc.history(s.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ancien_status, Some(Statut::Nouveau));
        assert_eq!(history[0].commentaire.as_deref(), Some(CREATION_COMMENT));

        let queued = store.list_sync_entries(Some(QueueStatus::Pending), 10).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, SyncAction::Create);

        assert_eq!(store.count_unread_notifications(boss.id).unwrap(), 1);
    }

    #[test]
    fn test_create_validation() {
        let store = Store::open_in_memory().unwrap();
        let svc = service(&store);

        let mut bad = input("x");
        bad.latitude = 91.0;
        assert!(matches!(svc.create(None, bad), Err(ServiceError::Validation(_))));
        assert!(matches!(svc.create(None, input("   ")), Err(ServiceError::Validation(_))));

        let mut bad_level = input("x");
        bad_level.niveau = Some(11);
        assert!(svc.create(None, bad_level).is_err());
    }

    #[test]
    fn test_budget_computed_from_dimensions() {
        let store = Store::open_in_memory().unwrap();
        let svc = service(&store);

        let mut with_dims = input("Affaissement");
        with_dims.niveau = Some(4);
        with_dims.surface = Some(12.5);
        let s = svc.create(None, with_dims).unwrap();
        assert_eq!(s.budget, Some(500_000.0));

        let mut explicit = input("Fissure");
        explicit.niveau = Some(4);
        explicit.surface = Some(12.5);
        explicit.budget = Some(42.0);
        assert_eq!(svc.create(None, explicit).unwrap().budget, Some(42.0));
    }

    #[test]
    fn test_status_transitions() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let user = citizen(&store, "rabe@example.mg");
        let svc = service(&store);
        let s = svc.create(Some(&user), input("Nid de poule")).unwrap();

        // same status: nothing recorded
        svc.change_status(&boss, s.id, Statut::Nouveau, None).unwrap();
        assert_eq!(svc.history(s.id).unwrap().len(), 1);

        // citizens cannot move their report forward
        assert!(matches!(
            svc.change_status(&user, s.id, Statut::EnCours, None),
            Err(ServiceError::Forbidden(_))
        ));

        let s2 = svc
            .change_status(&boss, s.id, Statut::EnCours, Some("Équipe envoyée"))
            .unwrap();
        assert_eq!(s2.status, Statut::EnCours);

        let latest = svc.latest_history(s.id).unwrap();
        assert_eq!(latest.ancien_status, Some(Statut::Nouveau));
        assert_eq!(latest.commentaire.as_deref(), Some("Équipe envoyée"));

        let notes = store.list_notifications(user.id, true).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].notification_type, NotificationType::StatusChange);
        assert_eq!(notes[0].new_status, Some(Statut::EnCours));
    }

    #[test]
    fn test_citizen_may_cancel_own_new_signalement() {
        let store = Store::open_in_memory().unwrap();
        let user = citizen(&store, "rabe@example.mg");
        let other = citizen(&store, "other@example.mg");
        let svc = service(&store);
        let s = svc.create(Some(&user), input("Doublon")).unwrap();

        assert!(svc.change_status(&other, s.id, Statut::Annule, None).is_err());
        let cancelled = svc.change_status(&user, s.id, Statut::Annule, None).unwrap();
        assert_eq!(cancelled.status, Statut::Annule);

        // annule is terminal for non-managers
        assert!(svc.change_status(&user, s.id, Statut::Nouveau, None).is_err());
    }

    #[test]
    fn test_manager_can_reopen() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);
        let s = svc.create(None, input("Nid de poule")).unwrap();

        svc.change_status(&boss, s.id, Statut::EnCours, None).unwrap();
        svc.change_status(&boss, s.id, Statut::Termine, None).unwrap();
        let reopened = svc.change_status(&boss, s.id, Statut::EnCours, Some("Reprise")).unwrap();
        assert_eq!(reopened.status, Statut::EnCours);
    }

    #[test]
    fn test_find_by_location_sorted_and_bounded() {
        let store = Store::open_in_memory().unwrap();
        let svc = service(&store);

        let mut near = input("Près");
        near.latitude = -18.880;
        near.longitude = 47.508;
        let mut nearer = input("Tout près");
        nearer.latitude = -18.8793;
        nearer.longitude = 47.5079;
        let mut far = input("Toamasina");
        far.latitude = -18.1492;
        far.longitude = 49.4023;
        svc.create(None, near).unwrap();
        svc.create(None, nearer).unwrap();
        svc.create(None, far).unwrap();

        let found = svc.find_by_location(-18.8792, 47.5079, None).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].signalement.description, "Tout près");
        assert!(found[0].distance_km <= found[1].distance_km);

        assert_eq!(svc.find_by_location(-18.8792, 47.5079, Some(500.0)).unwrap().len(), 3);
    }

    #[test]
    fn test_statistics_avancement() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);

        assert_eq!(svc.statistics().unwrap().avancement, 0.0);

        let ids: Vec<i64> = (0..3)
            .map(|i| svc.create(None, input(&format!("S{}", i))).unwrap().id)
            .collect();
        svc.change_status(&boss, ids[0], Statut::EnCours, None).unwrap();
        svc.change_status(&boss, ids[0], Statut::Termine, None).unwrap();

        let stats = svc.statistics().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.termine, 1);
        assert_eq!(stats.nouveau, 2);
        assert_eq!(stats.avancement, 33.3);
    }

    #[test]
    fn test_delete_queues_remote_delete_only_when_synced() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let svc = service(&store);

        let local_only = svc.create(None, input("Local")).unwrap();
        svc.delete(&boss, local_only.id).unwrap();
        assert_eq!(store.sync_queue_counts().unwrap().pending, 0);

        let synced = svc.create(None, input("Synced")).unwrap();
        store.mark_signalement_synced(synced.id, "fs-123").unwrap();
        svc.delete(&boss, synced.id).unwrap();

        let pending = store.list_sync_entries(Some(QueueStatus::Pending), 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, SyncAction::Delete);
        assert_eq!(pending[0].payload, Some(json!({"firebase_id": "fs-123"})));
        assert!(matches!(svc.get(synced.id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_update_owner_only_and_recomputes_budget() {
        let store = Store::open_in_memory().unwrap();
        let user = citizen(&store, "rabe@example.mg");
        let other = citizen(&store, "other@example.mg");
        let svc = service(&store);
        let s = svc.create(Some(&user), input("Nid de poule")).unwrap();

        assert!(matches!(
            svc.update(&other, s.id, SignalementUpdate::default()),
            Err(ServiceError::Forbidden(_))
        ));

        let updated = svc
            .update(
                &user,
                s.id,
                SignalementUpdate {
                    niveau: Some(2),
                    surface: Some(3.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.budget, Some(60_000.0));
        assert!(!updated.firebase_synced);
    }
}
