//! Seed data
//!
//! `ensure_defaults` runs at every server start and only fills what is
//! missing. `load_seed_file` loads a JSON document in the layout of the
//! Firestore import script: `users`, `entreprises` (or `enterprises`) and
//! `signalements` maps keyed by a seed id, with signalements referring to
//! users and entreprises by that key.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use super::IntegrationError;
use crate::config::Config;
use crate::service::password::hash_password;
use crate::storage::settings::PRIX_PAR_M2;
use crate::storage::sync_queue::DEFAULT_PRIORITY;
use crate::storage::{
    EntityType, NewEntreprise, NewSignalement, NewUser, Role, Statut, Store, SyncAction,
};

/// What a seeding pass wrote
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct SeedReport {
    pub configurations_created: usize,
    pub users_created: usize,
    pub users_skipped: usize,
    pub entreprises_created: usize,
    pub entreprises_skipped: usize,
    pub signalements_created: usize,
    pub errors: Vec<String>,
}

/// Insert the default price per m² and the bootstrap manager when absent.
///
/// Roles and statuses are reference rows written by the schema migration.
/// No manager is created while `auth.admin_password` is empty.
pub fn ensure_defaults(store: &Store, config: &Config) -> Result<SeedReport, IntegrationError> {
    let mut report = SeedReport::default();

    if store.insert_configuration_if_absent(
        PRIX_PAR_M2,
        &config.budget.default_prix_par_m2.to_string(),
        "DECIMAL",
        Some("Prix par m² utilisé pour le calcul du budget"),
    )? {
        report.configurations_created += 1;
        tracing::info!(prix = config.budget.default_prix_par_m2, "Default PRIX_PAR_M2 created");
    }

    let auth = &config.auth;
    let email = auth.admin_email.trim().to_lowercase();
    if auth.admin_password.is_empty() || email.is_empty() {
        tracing::debug!("No default manager configured");
        return Ok(report);
    }

    if store.get_user_by_email(&email)?.is_some() {
        report.users_skipped += 1;
    } else {
        let user = store.insert_user(&NewUser {
            email,
            password_hash: hash_password(&auth.admin_password)?,
            name: auth.admin_name.clone(),
            role: Role::Manager,
            created_by: None,
        })?;
        store.enqueue_sync(EntityType::User, user.id, SyncAction::Create, None, DEFAULT_PRIORITY)?;
        report.users_created += 1;
        tracing::info!(user_id = user.id, email = %user.email, "Default manager created");
    }

    Ok(report)
}

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub users: BTreeMap<String, SeedUser>,
    #[serde(default, alias = "enterprises")]
    pub entreprises: BTreeMap<String, SeedEntreprise>,
    #[serde(default)]
    pub signalements: BTreeMap<String, SeedSignalement>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub email: String,
    /// Plain password; accounts without one cannot log in until reset
    #[serde(default)]
    pub password: Option<String>,
    pub name: String,
    #[serde(default)]
    pub role_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedEntreprise {
    pub nom: String,
    #[serde(default)]
    pub siret: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "address")]
    pub adresse: Option<String>,
    #[serde(default)]
    pub specialites: Vec<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub note_moyenne: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSignalement {
    /// Seed key of the author
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, alias = "enterprise_id")]
    pub entreprise_id: Option<String>,
    #[serde(default, alias = "status_id")]
    pub status: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, alias = "address")]
    pub adresse: Option<String>,
    pub description: String,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub niveau: Option<u8>,
    #[serde(default)]
    pub surface: Option<f64>,
}

/// Parse a seed file and load it into the store
pub fn load_seed_file(store: &Store, path: &Path) -> Result<SeedReport, IntegrationError> {
    let content = std::fs::read_to_string(path)?;
    let seed: SeedFile =
        serde_json::from_str(&content).map_err(|e| IntegrationError::ParseError(e.to_string()))?;
    let report = seed.apply(store)?;

    tracing::info!(
        path = ?path,
        users = report.users_created,
        entreprises = report.entreprises_created,
        signalements = report.signalements_created,
        errors = report.errors.len(),
        "Seed file loaded"
    );
    Ok(report)
}

impl SeedFile {
    /// Existing users (by email) and entreprises (by nom) are reused, so a
    /// file can be loaded twice without duplicating them.
    pub fn apply(&self, store: &Store) -> Result<SeedReport, IntegrationError> {
        let mut report = SeedReport::default();
        let mut user_ids: HashMap<&str, i64> = HashMap::new();
        let mut entreprise_ids: HashMap<&str, i64> = HashMap::new();

        for (key, seed) in &self.users {
            let email = seed.email.trim().to_lowercase();
            if let Some(existing) = store.get_user_by_email(&email)? {
                user_ids.insert(key.as_str(), existing.id);
                report.users_skipped += 1;
                continue;
            }

            let role = seed
                .role_id
                .as_deref()
                .and_then(|r| Role::from_str(r).ok())
                .unwrap_or(Role::Utilisateur);
            let password = seed
                .password
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let user = store.insert_user(&NewUser {
                email,
                password_hash: hash_password(&password)?,
                name: seed.name.trim().to_string(),
                role,
                created_by: None,
            })?;
            store.enqueue_sync(EntityType::User, user.id, SyncAction::Create, None, DEFAULT_PRIORITY)?;
            user_ids.insert(key.as_str(), user.id);
            report.users_created += 1;
        }

        for (key, seed) in &self.entreprises {
            if let Some(existing) = store.get_entreprise_by_nom(seed.nom.trim())? {
                entreprise_ids.insert(key.as_str(), existing.id);
                report.entreprises_skipped += 1;
                continue;
            }

            let mut entreprise = store.insert_entreprise(&NewEntreprise {
                nom: seed.nom.trim().to_string(),
                siret: seed.siret.clone(),
                telephone: seed.telephone.clone(),
                email: seed.email.clone(),
                adresse: seed.adresse.clone(),
                specialites: seed.specialites.clone(),
                created_by: None,
            })?;
            if seed.is_active == Some(false) || seed.note_moyenne.is_some() {
                entreprise.is_active = seed.is_active.unwrap_or(true);
                entreprise.note_moyenne = seed.note_moyenne.filter(|n| (0.0..=5.0).contains(n));
                entreprise = store.save_entreprise(&entreprise)?;
            }
            store.enqueue_sync(
                EntityType::Entreprise,
                entreprise.id,
                SyncAction::Create,
                None,
                DEFAULT_PRIORITY,
            )?;
            entreprise_ids.insert(key.as_str(), entreprise.id);
            report.entreprises_created += 1;
        }

        for (key, seed) in &self.signalements {
            let status = match seed.status.as_deref().map(Statut::from_str).transpose() {
                Ok(status) => status,
                Err(e) => {
                    report.errors.push(format!("signalement {}: {}", key, e));
                    continue;
                }
            };
            if seed.description.trim().is_empty() {
                report.errors.push(format!("signalement {}: description is required", key));
                continue;
            }

            let user_id = seed.user_id.as_deref().and_then(|k| user_ids.get(k).copied());
            let entreprise_id = seed
                .entreprise_id
                .as_deref()
                .and_then(|k| entreprise_ids.get(k).copied());

            match store.insert_signalement(
                &NewSignalement {
                    user_id,
                    latitude: seed.latitude,
                    longitude: seed.longitude,
                    adresse: seed.adresse.clone(),
                    description: seed.description.clone(),
                    budget: seed.budget,
                    niveau: seed.niveau,
                    surface: seed.surface,
                    entreprise_id,
                    status,
                    date_signalement: None,
                },
                None,
            ) {
                Ok(s) => {
                    store.enqueue_sync(
                        EntityType::Signalement,
                        s.id,
                        SyncAction::Create,
                        None,
                        DEFAULT_PRIORITY,
                    )?;
                    report.signalements_created += 1;
                }
                Err(e) => report.errors.push(format!("signalement {}: {}", key, e)),
            }
        }

        Ok(report)
    }
}
