//! Core data types for the Voirie store
//!
//! This module defines the records persisted in SQLite:
//! - `Signalement`: a citizen road-defect report and its `Statut`
//! - `User`, `Session`, `LoginAttempt`: accounts and authentication
//! - `Entreprise`, `SignalementAction`: contractors and the works they carry out
//! - `PhotoSignalement`, `HistoriqueStatus`, `Notification`, `Configuration`
//! - `SyncQueueEntry`, `SyncHistory`: the outbox toward the remote document store

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements text storage for a C-like enum through `as_str` / `FromStr`.
macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                <$ty>::from_str(text).map_err(|e| FromSqlError::Other(e.into()))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ============================================
// STATUT
// ============================================

/// Lifecycle label of a signalement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statut {
    Nouveau,
    EnCours,
    Termine,
    Annule,
}

impl Statut {
    pub const ALL: [Statut; 4] = [
        Statut::Nouveau,
        Statut::EnCours,
        Statut::Termine,
        Statut::Annule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Statut::Nouveau => "nouveau",
            Statut::EnCours => "en_cours",
            Statut::Termine => "termine",
            Statut::Annule => "annule",
        }
    }

    /// Code stored in `statusCode` on remote documents, the form the
    /// mobile client filters on
    pub fn firestore_code(&self) -> &'static str {
        match self {
            Statut::Nouveau => "NOUVEAU",
            Statut::EnCours => "EN_COURS",
            Statut::Termine => "TERMINE",
            Statut::Annule => "ANNULE",
        }
    }

    pub fn libelle(&self) -> &'static str {
        match self {
            Statut::Nouveau => "Nouveau",
            Statut::EnCours => "En cours",
            Statut::Termine => "Terminé",
            Statut::Annule => "Annulé",
        }
    }

    pub fn ordre(&self) -> u8 {
        match self {
            Statut::Nouveau => 1,
            Statut::EnCours => 2,
            Statut::Termine => 3,
            Statut::Annule => 4,
        }
    }

    pub fn couleur(&self) -> &'static str {
        match self {
            Statut::Nouveau => "#3b82f6",
            Statut::EnCours => "#f59e0b",
            Statut::Termine => "#10b981",
            Statut::Annule => "#6b7280",
        }
    }

    /// termine and annule accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Statut::Termine | Statut::Annule)
    }

    /// Forward transitions: nouveau → en_cours | annule, en_cours → termine | annule
    pub fn can_transition_to(&self, next: Statut) -> bool {
        matches!(
            (self, next),
            (Statut::Nouveau, Statut::EnCours)
                | (Statut::Nouveau, Statut::Annule)
                | (Statut::EnCours, Statut::Termine)
                | (Statut::EnCours, Statut::Annule)
        )
    }
}

impl FromStr for Statut {
    type Err = String;

    /// Accepts the canonical codes plus the labels used by the clients
    /// ("en cours", "terminé", "annulé").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nouveau" | "new" => Ok(Statut::Nouveau),
            "en_cours" | "en cours" | "en-cours" | "encours" | "in_progress" => Ok(Statut::EnCours),
            "termine" | "terminé" | "done" => Ok(Statut::Termine),
            "annule" | "annulé" | "cancelled" => Ok(Statut::Annule),
            other => Err(format!("Unknown status: {}", other)),
        }
    }
}

text_enum_sql!(Statut);

// ============================================
// USERS & AUTH
// ============================================

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Manager,
    Utilisateur,
    Visiteur,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Manager, Role::Utilisateur, Role::Visiteur];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "MANAGER",
            Role::Utilisateur => "UTILISATEUR",
            Role::Visiteur => "VISITEUR",
        }
    }

    pub fn libelle(&self) -> &'static str {
        match self {
            Role::Manager => "Manager",
            Role::Utilisateur => "Utilisateur standard",
            Role::Visiteur => "Visiteur",
        }
    }

    pub fn niveau_acces(&self) -> u8 {
        match self {
            Role::Manager => 10,
            Role::Utilisateur => 5,
            Role::Visiteur => 1,
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MANAGER" | "ADMIN" => Ok(Role::Manager),
            "UTILISATEUR" | "USER" => Ok(Role::Utilisateur),
            "VISITEUR" | "VISITOR" => Ok(Role::Visiteur),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

text_enum_sql!(Role);

/// A registered account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
    pub last_failed_attempt_at: Option<DateTime<Utc>>,
    pub firebase_uid: Option<String>,
    pub firebase_synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }

    /// Locked and the lock has not yet elapsed
    pub fn is_currently_locked(&self, now: DateTime<Utc>) -> bool {
        self.is_locked && self.locked_until.map(|until| until > now).unwrap_or(true)
    }
}

/// Fields needed to insert a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub created_by: Option<i64>,
}

/// An authenticated session, identified by an opaque token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Why a login attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginFailure {
    UserNotFound,
    InvalidPassword,
    AccountLocked,
}

impl LoginFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginFailure::UserNotFound => "USER_NOT_FOUND",
            LoginFailure::InvalidPassword => "INVALID_PASSWORD",
            LoginFailure::AccountLocked => "ACCOUNT_LOCKED",
        }
    }
}

impl FromStr for LoginFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_NOT_FOUND" => Ok(LoginFailure::UserNotFound),
            "INVALID_PASSWORD" => Ok(LoginFailure::InvalidPassword),
            "ACCOUNT_LOCKED" => Ok(LoginFailure::AccountLocked),
            other => Err(format!("Unknown login failure: {}", other)),
        }
    }
}

text_enum_sql!(LoginFailure);

/// Audit row for each login attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginAttempt {
    pub id: i64,
    pub email: String,
    pub user_id: Option<i64>,
    pub success: bool,
    pub failure_reason: Option<LoginFailure>,
    pub ip_address: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

// ============================================
// SIGNALEMENTS
// ============================================

/// A citizen-submitted road-defect report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signalement {
    pub id: i64,
    pub user_id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub adresse: Option<String>,
    pub description: String,
    pub budget: Option<f64>,
    pub niveau: Option<u8>,
    pub surface: Option<f64>,
    pub entreprise_id: Option<i64>,
    pub status: Statut,
    pub date_signalement: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub firebase_id: Option<String>,
    pub firebase_synced: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Fields needed to insert a signalement
#[derive(Debug, Clone, Default)]
pub struct NewSignalement {
    pub user_id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub adresse: Option<String>,
    pub description: String,
    pub budget: Option<f64>,
    pub niveau: Option<u8>,
    pub surface: Option<f64>,
    pub entreprise_id: Option<i64>,
    /// Initial status, nouveau when absent
    pub status: Option<Statut>,
    pub date_signalement: Option<DateTime<Utc>>,
}

/// Filter for listing signalements
#[derive(Debug, Clone, Default)]
pub struct SignalementFilter {
    pub status: Option<Statut>,
    pub user_id: Option<i64>,
    pub entreprise_id: Option<i64>,
    /// Case-insensitive match on description or adresse
    pub search: Option<String>,
    /// Inclusive lower bound on date_signalement
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on date_signalement
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SignalementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Statut) -> Self {
        self.status = Some(status);
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn entreprise(mut self, entreprise_id: i64) -> Self {
        self.entreprise_id = Some(entreprise_id);
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

/// One row of a signalement's status history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoriqueStatus {
    pub id: i64,
    pub signalement_id: i64,
    pub ancien_status: Option<Statut>,
    pub nouveau_status: Statut,
    pub commentaire: Option<String>,
    pub changed_by: Option<i64>,
    pub changed_at: DateTime<Utc>,
}

/// A photo attached to a signalement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoSignalement {
    pub id: i64,
    pub signalement_id: i64,
    pub url: String,
    pub description: Option<String>,
    /// 1-based display order
    pub ordre: u32,
    pub is_principale: bool,
    pub uploaded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// ENTREPRISES & WORKS
// ============================================

/// A contractor company
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entreprise {
    pub id: i64,
    pub nom: String,
    pub siret: Option<String>,
    pub telephone: Option<String>,
    pub email: Option<String>,
    pub adresse: Option<String>,
    pub specialites: Vec<String>,
    pub is_active: bool,
    pub note_moyenne: Option<f64>,
    pub nombre_interventions: u32,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert an entreprise
#[derive(Debug, Clone, Default)]
pub struct NewEntreprise {
    pub nom: String,
    pub siret: Option<String>,
    pub telephone: Option<String>,
    pub email: Option<String>,
    pub adresse: Option<String>,
    pub specialites: Vec<String>,
    pub created_by: Option<i64>,
}

/// Works carried out on a signalement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalementAction {
    pub id: i64,
    pub signalement_id: i64,
    pub entreprise_id: Option<i64>,
    pub surface_m2: Option<f64>,
    pub budget: Option<f64>,
    pub date_debut_travaux: Option<DateTime<Utc>>,
    pub date_fin_prevue: Option<DateTime<Utc>>,
    pub date_fin_reelle: Option<DateTime<Utc>>,
    pub description_travaux: Option<String>,
    pub materiel_utilise: Option<String>,
    pub travaux_conformes: Option<bool>,
    pub commentaire_fin: Option<String>,
    pub photos_avant: Vec<String>,
    pub photos_apres: Vec<String>,
    pub created_by: Option<i64>,
    pub modified_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SignalementAction {
    pub fn is_started(&self) -> bool {
        self.date_debut_travaux.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.date_fin_reelle.is_some()
    }

    /// Planned end has passed and the works are not finished
    pub fn is_en_retard(&self, now: DateTime<Utc>) -> bool {
        !self.is_finished() && self.date_fin_prevue.map(|d| d < now).unwrap_or(false)
    }
}

/// Fields needed to insert a works record
#[derive(Debug, Clone, Default)]
pub struct NewAction {
    pub signalement_id: i64,
    pub entreprise_id: Option<i64>,
    pub surface_m2: Option<f64>,
    pub budget: Option<f64>,
    pub date_debut_travaux: Option<DateTime<Utc>>,
    pub date_fin_prevue: Option<DateTime<Utc>>,
    pub description_travaux: Option<String>,
    pub materiel_utilise: Option<String>,
    pub created_by: Option<i64>,
}

// ============================================
// NOTIFICATIONS & CONFIGURATION
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    StatusChange,
    NewAssignment,
    Reminder,
    Info,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::StatusChange => "status_change",
            NotificationType::NewAssignment => "new_assignment",
            NotificationType::Reminder => "reminder",
            NotificationType::Info => "info",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status_change" => Ok(NotificationType::StatusChange),
            "new_assignment" => Ok(NotificationType::NewAssignment),
            "reminder" => Ok(NotificationType::Reminder),
            "info" => Ok(NotificationType::Info),
            other => Err(format!("Unknown notification type: {}", other)),
        }
    }
}

text_enum_sql!(NotificationType);

/// A message addressed to one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub signalement_id: Option<i64>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub old_status: Option<Statut>,
    pub new_status: Option<Statut>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a notification
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub signalement_id: Option<i64>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub old_status: Option<Statut>,
    pub new_status: Option<Statut>,
}

impl NewNotification {
    pub fn new(
        user_id: i64,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            signalement_id: None,
            notification_type,
            title: title.into(),
            message: message.into(),
            old_status: None,
            new_status: None,
        }
    }

    pub fn signalement(mut self, id: i64) -> Self {
        self.signalement_id = Some(id);
        self
    }

    pub fn transition(mut self, old: Statut, new: Statut) -> Self {
        self.old_status = Some(old);
        self.new_status = Some(new);
        self
    }
}

/// A key/value application setting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    pub id: i64,
    pub cle: String,
    pub valeur: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub description: Option<String>,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Configuration {
    /// Finite values only; `inf` and `NaN` parse as f64 but are not amounts
    pub fn as_decimal(&self) -> Option<f64> {
        self.valeur
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

// ============================================
// SYNC OUTBOX
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Signalement,
    Entreprise,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Signalement => "signalement",
            EntityType::Entreprise => "entreprise",
        }
    }

    /// Remote collection holding this entity
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::User => "users",
            EntityType::Signalement => "signalements",
            EntityType::Entreprise => "entreprises",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityType::User),
            "signalement" => Ok(EntityType::Signalement),
            "entreprise" => Ok(EntityType::Entreprise),
            other => Err(format!("Unknown entity type: {}", other)),
        }
    }
}

text_enum_sql!(EntityType);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "CREATE",
            SyncAction::Update => "UPDATE",
            SyncAction::Delete => "DELETE",
        }
    }
}

impl FromStr for SyncAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(SyncAction::Create),
            "UPDATE" => Ok(SyncAction::Update),
            "DELETE" => Ok(SyncAction::Delete),
            other => Err(format!("Unknown sync action: {}", other)),
        }
    }
}

text_enum_sql!(SyncAction);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Push => "PUSH",
            SyncDirection::Pull => "PULL",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUSH" => Ok(SyncDirection::Push),
            "PULL" => Ok(SyncDirection::Pull),
            other => Err(format!("Unknown sync direction: {}", other)),
        }
    }
}

text_enum_sql!(SyncDirection);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Success => "SUCCESS",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(QueueStatus::Pending),
            "PROCESSING" => Ok(QueueStatus::Processing),
            "SUCCESS" => Ok(QueueStatus::Success),
            "FAILED" => Ok(QueueStatus::Failed),
            "CANCELLED" => Ok(QueueStatus::Cancelled),
            other => Err(format!("Unknown queue status: {}", other)),
        }
    }
}

text_enum_sql!(QueueStatus);

/// One pending (or processed) remote write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncQueueEntry {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub action: SyncAction,
    pub direction: SyncDirection,
    pub payload: Option<serde_json::Value>,
    pub status: QueueStatus,
    /// Lower runs first
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncHistory {
    pub id: i64,
    pub direction: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pushed: u32,
    pub pulled: u32,
    pub conflicts: u32,
    pub failed: u32,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_statut_parsing_accepts_labels() {
        assert_eq!("nouveau".parse::<Statut>().unwrap(), Statut::Nouveau);
        assert_eq!("en cours".parse::<Statut>().unwrap(), Statut::EnCours);
        assert_eq!("Terminé".parse::<Statut>().unwrap(), Statut::Termine);
        assert_eq!("annule".parse::<Statut>().unwrap(), Statut::Annule);
        assert_eq!("encours".parse::<Statut>().unwrap(), Statut::EnCours);
        assert_eq!("EN_COURS".parse::<Statut>().unwrap(), Statut::EnCours);
        assert!("ouvert".parse::<Statut>().is_err());
    }

    #[test]
    fn test_firestore_codes_round_trip() {
        assert_eq!(Statut::Nouveau.firestore_code(), "NOUVEAU");
        assert_eq!(Statut::EnCours.firestore_code(), "EN_COURS");
        for statut in Statut::ALL {
            assert_eq!(statut.firestore_code().parse::<Statut>().unwrap(), statut);
        }
    }

    #[test]
    fn test_statut_serialization() {
        let json = serde_json::to_string(&Statut::EnCours).unwrap();
        assert_eq!(json, "\"en_cours\"");
    }

    #[test]
    fn test_statut_transitions() {
        assert!(Statut::Nouveau.can_transition_to(Statut::EnCours));
        assert!(Statut::Nouveau.can_transition_to(Statut::Annule));
        assert!(Statut::EnCours.can_transition_to(Statut::Termine));
        assert!(!Statut::Nouveau.can_transition_to(Statut::Termine));
        assert!(!Statut::Termine.can_transition_to(Statut::EnCours));
        assert!(Statut::Annule.is_terminal());
    }

    #[test]
    fn test_role_aliases() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!("user".parse::<Role>().unwrap(), Role::Utilisateur);
        assert_eq!(Role::Manager.niveau_acces(), 10);
    }

    #[test]
    fn test_action_en_retard() {
        let now = Utc::now();
        let mut action = SignalementAction {
            id: 1,
            signalement_id: 1,
            entreprise_id: Some(1),
            surface_m2: None,
            budget: None,
            date_debut_travaux: Some(now - Duration::days(10)),
            date_fin_prevue: Some(now - Duration::days(1)),
            date_fin_reelle: None,
            description_travaux: None,
            materiel_utilise: None,
            travaux_conformes: None,
            commentaire_fin: None,
            photos_avant: Vec::new(),
            photos_apres: Vec::new(),
            created_by: None,
            modified_by: None,
            created_at: now,
            updated_at: now,
        };
        assert!(action.is_en_retard(now));

        action.date_fin_reelle = Some(now);
        assert!(!action.is_en_retard(now));
    }

    #[test]
    fn test_notification_type_rename() {
        let json = serde_json::to_value(NotificationType::NewAssignment).unwrap();
        assert_eq!(json, "new_assignment");
    }
}
