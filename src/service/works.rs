//! Works carried out on signalements
//!
//! A works record (`SignalementAction`) tracks the contractor, planned and
//! actual dates, budget and before/after photos. Starting and finishing
//! works drives the signalement status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::sync_queue::DEFAULT_PRIORITY;
use crate::storage::{
    EntityType, NewAction, NewNotification, NotificationType, SignalementAction, Statut, Store,
    SyncAction, User,
};

use super::budget::round2;
use super::error::{not_found, ServiceError, ServiceResult};
use super::notifier::{Notifier, TITLE_ACTION, TITLE_ASSIGNED, TITLE_WORKS_FINISHED, TITLE_WORKS_STARTED};
use super::signalements::SignalementService;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub entreprise_id: Option<i64>,
    #[serde(default)]
    pub surface_m2: Option<f64>,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub date_debut_travaux: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_fin_prevue: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description_travaux: Option<String>,
    #[serde(default)]
    pub materiel_utilise: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ActionStatistics {
    pub total: u64,
    pub en_cours: u64,
    pub termines: u64,
    pub en_retard: u64,
    pub budget_total: f64,
}

#[derive(Clone)]
pub struct WorksService {
    store: Store,
    signalements: SignalementService,
    notifier: Notifier,
}

impl WorksService {
    pub fn new(store: Store, signalements: SignalementService, notifier: Notifier) -> Self {
        Self {
            store,
            signalements,
            notifier,
        }
    }

    pub fn create(&self, signalement_id: i64, input: ActionInput, by: &User) -> ServiceResult<SignalementAction> {
        let signalement = self.signalements.get(signalement_id)?;
        validate_schedule(input.date_debut_travaux, input.date_fin_prevue)?;
        validate_amount("budget", input.budget)?;
        validate_amount("surface_m2", input.surface_m2)?;
        if let Some(entreprise_id) = input.entreprise_id {
            self.active_entreprise(entreprise_id)?;
        }

        let action = self.store.insert_action(&NewAction {
            signalement_id,
            entreprise_id: input.entreprise_id,
            surface_m2: input.surface_m2,
            budget: input.budget,
            date_debut_travaux: input.date_debut_travaux,
            date_fin_prevue: input.date_fin_prevue,
            description_travaux: input.description_travaux,
            materiel_utilise: input.materiel_utilise,
            created_by: Some(by.id),
        })?;

        if let Some(owner) = signalement.user_id {
            self.notify(
                owner,
                NotificationType::Info,
                TITLE_ACTION,
                "Une intervention a été planifiée sur votre signalement".to_string(),
                signalement_id,
            );
        }

        tracing::info!(action_id = action.id, signalement_id, by = by.id, "Works created");
        Ok(action)
    }

    pub fn get(&self, id: i64) -> ServiceResult<SignalementAction> {
        self.store.get_action(id)?.ok_or_else(|| not_found("action", id))
    }

    pub fn list_for_signalement(&self, signalement_id: i64) -> ServiceResult<Vec<SignalementAction>> {
        Ok(self.store.list_actions_for_signalement(signalement_id)?)
    }

    pub fn list_for_entreprise(&self, entreprise_id: i64) -> ServiceResult<Vec<SignalementAction>> {
        Ok(self.store.list_actions_for_entreprise(entreprise_id)?)
    }

    pub fn en_cours(&self) -> ServiceResult<Vec<SignalementAction>> {
        Ok(self.store.list_actions_en_cours()?)
    }

    /// Planned end has passed and the works are still open
    pub fn en_retard(&self) -> ServiceResult<Vec<SignalementAction>> {
        Ok(self.store.list_actions_en_retard(Utc::now())?)
    }

    /// Replace the editable fields; absent fields are left unchanged
    pub fn update(&self, id: i64, input: ActionInput, by: &User) -> ServiceResult<SignalementAction> {
        let mut action = self.get(id)?;
        validate_amount("budget", input.budget)?;
        validate_amount("surface_m2", input.surface_m2)?;

        if let Some(entreprise_id) = input.entreprise_id {
            if action.entreprise_id != Some(entreprise_id) {
                self.active_entreprise(entreprise_id)?;
            }
            action.entreprise_id = Some(entreprise_id);
        }
        if input.surface_m2.is_some() {
            action.surface_m2 = input.surface_m2;
        }
        if input.budget.is_some() {
            action.budget = input.budget;
        }
        if input.date_debut_travaux.is_some() {
            action.date_debut_travaux = input.date_debut_travaux;
        }
        if input.date_fin_prevue.is_some() {
            action.date_fin_prevue = input.date_fin_prevue;
        }
        if input.description_travaux.is_some() {
            action.description_travaux = input.description_travaux;
        }
        if input.materiel_utilise.is_some() {
            action.materiel_utilise = input.materiel_utilise;
        }
        validate_schedule(action.date_debut_travaux, action.date_fin_prevue)?;

        action.modified_by = Some(by.id);
        Ok(self.store.save_action(&action)?)
    }

    pub fn delete(&self, id: i64) -> ServiceResult<()> {
        if !self.store.delete_action(id)? {
            return Err(not_found("action", id));
        }
        Ok(())
    }

    /// Assign an active contractor to the works and to the signalement
    pub fn assign_entreprise(&self, action_id: i64, entreprise_id: i64, by: &User) -> ServiceResult<SignalementAction> {
        let mut action = self.get(action_id)?;
        let entreprise = self.active_entreprise(entreprise_id)?;

        action.entreprise_id = Some(entreprise.id);
        action.modified_by = Some(by.id);
        let action = self.store.save_action(&action)?;
        self.store.increment_interventions(entreprise.id)?;

        let mut signalement = self.signalements.get(action.signalement_id)?;
        signalement.entreprise_id = Some(entreprise.id);
        let signalement = self.store.save_signalement(&signalement)?;
        self.store.enqueue_sync(
            EntityType::Signalement,
            signalement.id,
            SyncAction::Update,
            None,
            DEFAULT_PRIORITY,
        )?;

        if let Some(owner) = signalement.user_id {
            self.notify(
                owner,
                NotificationType::NewAssignment,
                TITLE_ASSIGNED,
                format!("L'entreprise {} a été assignée à votre signalement", entreprise.nom),
                signalement.id,
            );
        }

        tracing::info!(action_id, entreprise_id, by = by.id, "Entreprise assigned");
        Ok(action)
    }

    /// Start the works now; a `nouveau` signalement moves to `en_cours`
    pub fn start(
        &self,
        action_id: i64,
        date_fin_prevue: Option<DateTime<Utc>>,
        by: &User,
    ) -> ServiceResult<SignalementAction> {
        let mut action = self.get(action_id)?;
        if action.entreprise_id.is_none() {
            return Err(ServiceError::Validation(
                "an entreprise must be assigned before starting the works".into(),
            ));
        }
        if action.is_started() {
            return Err(ServiceError::Conflict(format!("works {} already started", action_id)));
        }

        let now = Utc::now();
        if date_fin_prevue.is_some() {
            action.date_fin_prevue = date_fin_prevue;
        }
        validate_schedule(Some(now), action.date_fin_prevue)?;
        action.date_debut_travaux = Some(now);
        action.modified_by = Some(by.id);
        let action = self.store.save_action(&action)?;

        let signalement = self.signalements.get(action.signalement_id)?;
        if signalement.status == Statut::Nouveau {
            self.signalements.change_status(
                by,
                signalement.id,
                Statut::EnCours,
                Some("Démarrage des travaux"),
            )?;
        }
        if let Some(owner) = signalement.user_id {
            self.notify(
                owner,
                NotificationType::Info,
                TITLE_WORKS_STARTED,
                "Les travaux sur votre signalement ont démarré".to_string(),
                signalement.id,
            );
        }

        tracing::info!(action_id, signalement_id = signalement.id, "Works started");
        Ok(action)
    }

    /// Close the works and mark the signalement `termine`
    pub fn finish(
        &self,
        action_id: i64,
        conformes: Option<bool>,
        commentaire: Option<String>,
        by: &User,
    ) -> ServiceResult<SignalementAction> {
        let mut action = self.get(action_id)?;
        if !action.is_started() {
            return Err(ServiceError::Validation(format!("works {} not started", action_id)));
        }
        if action.is_finished() {
            return Err(ServiceError::Conflict(format!("works {} already finished", action_id)));
        }

        action.date_fin_reelle = Some(Utc::now());
        action.travaux_conformes = conformes;
        action.commentaire_fin = commentaire.filter(|c| !c.trim().is_empty());
        action.modified_by = Some(by.id);
        let action = self.store.save_action(&action)?;

        let signalement = self.signalements.get(action.signalement_id)?;
        if signalement.status != Statut::Termine {
            self.signalements.change_status(
                by,
                signalement.id,
                Statut::Termine,
                Some("Travaux terminés"),
            )?;
        }
        if let Some(owner) = signalement.user_id {
            self.notify(
                owner,
                NotificationType::Info,
                TITLE_WORKS_FINISHED,
                "Les travaux sur votre signalement sont terminés".to_string(),
                signalement.id,
            );
        }

        tracing::info!(action_id, signalement_id = signalement.id, conformes = ?conformes, "Works finished");
        Ok(action)
    }

    pub fn update_budget(&self, action_id: i64, budget: f64, by: &User) -> ServiceResult<SignalementAction> {
        validate_amount("budget", Some(budget))?;
        let mut action = self.get(action_id)?;
        action.budget = Some(round2(budget));
        action.modified_by = Some(by.id);
        Ok(self.store.save_action(&action)?)
    }

    pub fn add_photos_avant(&self, action_id: i64, urls: Vec<String>, by: &User) -> ServiceResult<SignalementAction> {
        self.add_photos(action_id, urls, by, |a| &mut a.photos_avant)
    }

    pub fn add_photos_apres(&self, action_id: i64, urls: Vec<String>, by: &User) -> ServiceResult<SignalementAction> {
        self.add_photos(action_id, urls, by, |a| &mut a.photos_apres)
    }

    fn add_photos(
        &self,
        action_id: i64,
        urls: Vec<String>,
        by: &User,
        target: impl FnOnce(&mut SignalementAction) -> &mut Vec<String>,
    ) -> ServiceResult<SignalementAction> {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(ServiceError::Validation("at least one photo url is required".into()));
        }

        let mut action = self.get(action_id)?;
        let photos = target(&mut action);
        for url in urls {
            if !photos.contains(&url) {
                photos.push(url);
            }
        }
        action.modified_by = Some(by.id);
        Ok(self.store.save_action(&action)?)
    }

    pub fn statistics(&self) -> ServiceResult<ActionStatistics> {
        let now = Utc::now();
        let actions = self.store.list_actions()?;

        let mut stats = ActionStatistics {
            total: actions.len() as u64,
            ..Default::default()
        };
        for action in &actions {
            if action.is_finished() {
                stats.termines += 1;
            } else if action.is_started() {
                stats.en_cours += 1;
            }
            if action.is_en_retard(now) {
                stats.en_retard += 1;
            }
            stats.budget_total += action.budget.unwrap_or(0.0);
        }
        stats.budget_total = round2(stats.budget_total);
        Ok(stats)
    }

    fn active_entreprise(&self, id: i64) -> ServiceResult<crate::storage::Entreprise> {
        let entreprise = self
            .store
            .get_entreprise(id)?
            .ok_or_else(|| not_found("entreprise", id))?;
        if !entreprise.is_active {
            return Err(ServiceError::Validation(format!(
                "entreprise {} is not active",
                entreprise.nom
            )));
        }
        Ok(entreprise)
    }

    fn notify(&self, user_id: i64, kind: NotificationType, title: &str, message: String, signalement_id: i64) {
        self.notifier
            .send_quietly(NewNotification::new(user_id, kind, title, message).signalement(signalement_id));
    }
}

fn validate_schedule(debut: Option<DateTime<Utc>>, fin_prevue: Option<DateTime<Utc>>) -> ServiceResult<()> {
    if let (Some(debut), Some(fin)) = (debut, fin_prevue) {
        if fin < debut {
            return Err(ServiceError::Validation(
                "date_fin_prevue cannot be before date_debut_travaux".into(),
            ));
        }
    }
    Ok(())
}

fn validate_amount(field: &str, value: Option<f64>) -> ServiceResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(ServiceError::Validation(format!("{} cannot be negative", field)))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::budget::BudgetService;
    use crate::service::testing::{citizen, manager, signalement};
    use crate::storage::NewEntreprise;
    use chrono::Duration;

    fn services(store: &Store) -> WorksService {
        let notifier = Notifier::new(store.clone(), None);
        let signalements = SignalementService::new(
            store.clone(),
            BudgetService::new(store.clone(), 10_000.0),
            notifier.clone(),
        );
        WorksService::new(store.clone(), signalements, notifier)
    }

    fn entreprise(store: &Store, nom: &str) -> i64 {
        store
            .insert_entreprise(&NewEntreprise {
                nom: nom.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_full_works_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let user = citizen(&store, "rabe@example.mg");
        let s = signalement(&store, Some(user.id));
        let colas = entreprise(&store, "COLAS");
        let works = services(&store);

        let action = works.create(s.id, ActionInput::default(), &boss).unwrap();

        // cannot start without an entreprise
        assert!(matches!(
            works.start(action.id, None, &boss),
            Err(ServiceError::Validation(_))
        ));

        let action = works.assign_entreprise(action.id, colas, &boss).unwrap();
        assert_eq!(action.entreprise_id, Some(colas));
        assert_eq!(store.get_entreprise(colas).unwrap().unwrap().nombre_interventions, 1);
        assert_eq!(store.get_signalement(s.id).unwrap().unwrap().entreprise_id, Some(colas));

        let started = works
            .start(action.id, Some(Utc::now() + Duration::days(10)), &boss)
            .unwrap();
        assert!(started.is_started());
        assert_eq!(store.get_signalement(s.id).unwrap().unwrap().status, Statut::EnCours);
        assert!(matches!(
            works.start(action.id, None, &boss),
            Err(ServiceError::Conflict(_))
        ));

        let finished = works
            .finish(action.id, Some(true), Some("RAS".to_string()), &boss)
            .unwrap();
        assert_eq!(finished.travaux_conformes, Some(true));
        assert_eq!(finished.commentaire_fin.as_deref(), Some("RAS"));
        assert_eq!(store.get_signalement(s.id).unwrap().unwrap().status, Statut::Termine);
        assert!(works.finish(action.id, None, None, &boss).is_err());

        // created, assigned, two status changes, started, finished
        assert_eq!(store.list_notifications(user.id, false).unwrap().len(), 6);
    }

    #[test]
    fn test_finish_requires_start() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let s = signalement(&store, None);
        let works = services(&store);

        let action = works.create(s.id, ActionInput::default(), &boss).unwrap();
        assert!(matches!(
            works.finish(action.id, None, None, &boss),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_inactive_entreprise_rejected() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let s = signalement(&store, None);
        let id = entreprise(&store, "Sogea");
        let mut e = store.get_entreprise(id).unwrap().unwrap();
        e.is_active = false;
        store.save_entreprise(&e).unwrap();

        let works = services(&store);
        let action = works.create(s.id, ActionInput::default(), &boss).unwrap();
        assert!(matches!(
            works.assign_entreprise(action.id, id, &boss),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_schedule_and_budget_validation() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let s = signalement(&store, None);
        let works = services(&store);

        let now = Utc::now();
        let backwards = ActionInput {
            date_debut_travaux: Some(now),
            date_fin_prevue: Some(now - Duration::days(1)),
            ..Default::default()
        };
        assert!(works.create(s.id, backwards, &boss).is_err());

        let negative = ActionInput {
            budget: Some(-10.0),
            ..Default::default()
        };
        assert!(works.create(s.id, negative, &boss).is_err());

        let action = works.create(s.id, ActionInput::default(), &boss).unwrap();
        assert!(works.update_budget(action.id, -1.0, &boss).is_err());
        assert_eq!(
            works.update_budget(action.id, 1500.555, &boss).unwrap().budget,
            Some(1500.56)
        );
    }

    #[test]
    fn test_photos_are_deduplicated() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let s = signalement(&store, None);
        let works = services(&store);
        let action = works.create(s.id, ActionInput::default(), &boss).unwrap();

        works
            .add_photos_avant(action.id, vec!["https://img/a.jpg".into(), "https://img/b.jpg".into()], &boss)
            .unwrap();
        let action = works
            .add_photos_avant(action.id, vec!["https://img/a.jpg".into(), " ".into()], &boss)
            .unwrap();
        assert_eq!(action.photos_avant.len(), 2);
        assert!(action.photos_apres.is_empty());

        assert!(works.add_photos_apres(action.id, vec![], &boss).is_err());
    }

    #[test]
    fn test_statistics_and_en_retard() {
        let store = Store::open_in_memory().unwrap();
        let boss = manager(&store);
        let s = signalement(&store, None);
        let works = services(&store);

        let past = Utc::now() - Duration::days(3);
        works
            .create(
                s.id,
                ActionInput {
                    budget: Some(1000.0),
                    date_debut_travaux: Some(past - Duration::days(5)),
                    date_fin_prevue: Some(past),
                    ..Default::default()
                },
                &boss,
            )
            .unwrap();
        works
            .create(
                s.id,
                ActionInput {
                    budget: Some(250.5),
                    ..Default::default()
                },
                &boss,
            )
            .unwrap();

        assert_eq!(works.en_retard().unwrap().len(), 1);

        let stats = works.statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.en_cours, 1);
        assert_eq!(stats.termines, 0);
        assert_eq!(stats.en_retard, 1);
        assert_eq!(stats.budget_total, 1250.5);
    }
}
