//! Contractor directory

use serde::Deserialize;
use serde_json::json;

use crate::storage::sync_queue::DEFAULT_PRIORITY;
use crate::storage::{Entreprise, EntityType, NewEntreprise, Store, SyncAction, User};

use super::auth::is_valid_email;
use super::budget::round2;
use super::error::{not_found, ServiceError, ServiceResult};

pub const NOTE_MIN: f64 = 0.0;
pub const NOTE_MAX: f64 = 5.0;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntrepriseInput {
    pub nom: String,
    #[serde(default)]
    pub siret: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub adresse: Option<String>,
    #[serde(default)]
    pub specialites: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntrepriseUpdate {
    pub nom: Option<String>,
    pub siret: Option<String>,
    pub telephone: Option<String>,
    pub email: Option<String>,
    pub adresse: Option<String>,
    pub specialites: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct EntrepriseService {
    store: Store,
}

impl EntrepriseService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create(&self, input: EntrepriseInput, by: &User) -> ServiceResult<Entreprise> {
        let nom = input.nom.trim();
        if nom.is_empty() {
            return Err(ServiceError::Validation("nom is required".into()));
        }
        let email = clean(input.email);
        validate_email(email.as_deref())?;

        let entreprise = self.store.insert_entreprise(&NewEntreprise {
            nom: nom.to_string(),
            siret: clean(input.siret),
            telephone: clean(input.telephone),
            email,
            adresse: clean(input.adresse),
            specialites: clean_list(input.specialites),
            created_by: Some(by.id),
        })?;
        self.enqueue(entreprise.id, SyncAction::Create)?;

        tracing::info!(entreprise_id = entreprise.id, nom = %entreprise.nom, "Entreprise created");
        Ok(entreprise)
    }

    pub fn get(&self, id: i64) -> ServiceResult<Entreprise> {
        self.store
            .get_entreprise(id)?
            .ok_or_else(|| not_found("entreprise", id))
    }

    pub fn list(&self) -> ServiceResult<Vec<Entreprise>> {
        Ok(self.store.list_entreprises(false)?)
    }

    pub fn active(&self) -> ServiceResult<Vec<Entreprise>> {
        Ok(self.store.list_entreprises(true)?)
    }

    pub fn top_rated(&self, limit: usize) -> ServiceResult<Vec<Entreprise>> {
        Ok(self.store.top_rated_entreprises(limit.max(1))?)
    }

    pub fn by_specialite(&self, specialite: &str) -> ServiceResult<Vec<Entreprise>> {
        if specialite.trim().is_empty() {
            return Err(ServiceError::Validation("specialite is required".into()));
        }
        Ok(self.store.list_entreprises_by_specialite(specialite)?)
    }

    pub fn update(&self, id: i64, input: EntrepriseUpdate) -> ServiceResult<Entreprise> {
        let mut e = self.get(id)?;

        if let Some(nom) = input.nom {
            let nom = nom.trim();
            if nom.is_empty() {
                return Err(ServiceError::Validation("nom cannot be empty".into()));
            }
            e.nom = nom.to_string();
        }
        if input.email.is_some() {
            e.email = clean(input.email);
            validate_email(e.email.as_deref())?;
        }
        if input.siret.is_some() {
            e.siret = clean(input.siret);
        }
        if input.telephone.is_some() {
            e.telephone = clean(input.telephone);
        }
        if input.adresse.is_some() {
            e.adresse = clean(input.adresse);
        }
        if let Some(specialites) = input.specialites {
            e.specialites = clean_list(specialites);
        }

        let saved = self.store.save_entreprise(&e)?;
        self.enqueue(saved.id, SyncAction::Update)?;
        Ok(saved)
    }

    pub fn delete(&self, id: i64) -> ServiceResult<()> {
        self.get(id)?;
        self.store.cancel_pending_sync_for(EntityType::Entreprise, id)?;
        self.store.delete_entreprise(id)?;
        // entreprise documents are keyed by the local id
        self.store.enqueue_sync(
            EntityType::Entreprise,
            id,
            SyncAction::Delete,
            Some(&json!({ "firebase_id": id.to_string() })),
            DEFAULT_PRIORITY,
        )?;
        tracing::info!(entreprise_id = id, "Entreprise deleted");
        Ok(())
    }

    pub fn activate(&self, id: i64) -> ServiceResult<Entreprise> {
        self.set_active(id, true)
    }

    pub fn deactivate(&self, id: i64) -> ServiceResult<Entreprise> {
        self.set_active(id, false)
    }

    fn set_active(&self, id: i64, active: bool) -> ServiceResult<Entreprise> {
        let mut e = self.get(id)?;
        if e.is_active == active {
            return Ok(e);
        }
        e.is_active = active;
        let saved = self.store.save_entreprise(&e)?;
        self.enqueue(id, SyncAction::Update)?;
        tracing::info!(entreprise_id = id, active, "Entreprise activation changed");
        Ok(saved)
    }

    /// Fold a new rating into the running average: `(old + note) / 2`
    pub fn update_note(&self, id: i64, note: f64) -> ServiceResult<Entreprise> {
        if !note.is_finite() || !(NOTE_MIN..=NOTE_MAX).contains(&note) {
            return Err(ServiceError::Validation(format!(
                "note must be between {} and {}",
                NOTE_MIN, NOTE_MAX
            )));
        }

        let mut e = self.get(id)?;
        let average = match e.note_moyenne {
            Some(old) => (old + note) / 2.0,
            None => note,
        };
        e.note_moyenne = Some(round2(average));

        let saved = self.store.save_entreprise(&e)?;
        self.enqueue(id, SyncAction::Update)?;
        Ok(saved)
    }

    fn enqueue(&self, id: i64, action: SyncAction) -> ServiceResult<()> {
        self.store
            .enqueue_sync(EntityType::Entreprise, id, action, None, DEFAULT_PRIORITY)?;
        Ok(())
    }
}

fn validate_email(email: Option<&str>) -> ServiceResult<()> {
    match email {
        Some(email) if !is_valid_email(email) => {
            Err(ServiceError::Validation(format!("invalid email: {}", email)))
        }
        _ => Ok(()),
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
