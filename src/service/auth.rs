//! Accounts, sessions and lockout
//!
//! Login flow:
//!
//! ```text
//! unknown email ─────────────► InvalidCredentials  (attempt USER_NOT_FOUND)
//! locked, lock not elapsed ──► AccountLocked       (attempt ACCOUNT_LOCKED)
//! wrong password ────────────► InvalidCredentials, or AccountLocked once
//!                              failed_attempts reaches the limit
//! valid session exists ──────► SessionAlreadyActive
//! otherwise ─────────────────► new session token
//! ```

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::storage::sync_queue::DEFAULT_PRIORITY;
use crate::storage::{EntityType, LoginFailure, NewUser, Role, Session, Store, SyncAction, User};

use super::error::{not_found, ServiceError, ServiceResult};
use super::password::{hash_password, verify_password};

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE
        .as_ref()
        .map(|re| re.is_match(email.trim()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Account and session rules
#[derive(Clone)]
pub struct AuthService {
    store: Store,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(store: Store, config: AuthConfig) -> Self {
        Self { store, config }
    }

    /// Create an account. Only a manager may create another manager.
    pub fn register(&self, input: RegisterInput, created_by: Option<&User>) -> ServiceResult<User> {
        let email = input.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::Validation(format!("invalid email: {}", input.email)));
        }
        validate_password(&input.password)?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("name is required".into()));
        }

        let role = input.role.unwrap_or(Role::Utilisateur);
        let creator_is_manager = created_by.map(User::is_manager).unwrap_or(false);
        if role == Role::Manager && !creator_is_manager {
            return Err(ServiceError::Forbidden("only a manager can create a manager".into()));
        }

        if self.store.get_user_by_email(&email)?.is_some() {
            return Err(ServiceError::Conflict(format!("email already registered: {}", email)));
        }

        let user = self.store.insert_user(&NewUser {
            email,
            password_hash: hash_password(&input.password)?,
            name: name.to_string(),
            role,
            created_by: created_by.map(|u| u.id),
        })?;
        self.store
            .enqueue_sync(EntityType::User, user.id, SyncAction::Create, None, DEFAULT_PRIORITY)?;

        tracing::info!(user_id = user.id, role = %user.role, "User registered");
        Ok(user)
    }

    pub fn login(
        &self,
        email: &str,
        password: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> ServiceResult<LoginResponse> {
        let email = email.trim().to_lowercase();
        let now = Utc::now();

        let Some(mut user) = self.store.get_user_by_email(&email)? else {
            self.store
                .record_login_attempt(&email, None, Some(LoginFailure::UserNotFound), ip_address)?;
            tracing::info!(email = %email, "Login failed: unknown user");
            return Err(ServiceError::InvalidCredentials {
                remaining_attempts: None,
            });
        };

        if user.is_locked {
            match user.locked_until {
                Some(until) if until > now => {
                    self.store.record_login_attempt(
                        &email,
                        Some(user.id),
                        Some(LoginFailure::AccountLocked),
                        ip_address,
                    )?;
                    return Err(ServiceError::AccountLocked { until });
                }
                _ => {
                    user = self.reset_lockout(user)?;
                    tracing::info!(user_id = user.id, "Lock elapsed, account unlocked");
                }
            }
        }

        if !verify_password(password, &user.password_hash) {
            return self.register_failure(user, &email, ip_address, now);
        }

        if self.store.active_session_for_user(user.id, now)?.is_some() {
            return Err(ServiceError::SessionAlreadyActive);
        }

        if user.failed_attempts > 0 {
            user = self.reset_lockout(user)?;
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = now + Duration::minutes(self.config.session_minutes);
        self.store
            .create_session(user.id, &token, expires_at, ip_address, user_agent)?;
        self.store
            .record_login_attempt(&email, Some(user.id), None, ip_address)?;

        tracing::info!(user_id = user.id, "Login succeeded");
        Ok(LoginResponse {
            token,
            user,
            expires_at,
        })
    }

    fn register_failure(
        &self,
        mut user: User,
        email: &str,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<LoginResponse> {
        user.failed_attempts += 1;
        user.last_failed_attempt_at = Some(now);

        let max = self.config.max_login_attempts;
        let locked = user.failed_attempts >= max;
        if locked {
            user.is_locked = true;
            user.locked_until = Some(now + Duration::minutes(self.config.lockout_minutes));
        }

        let user = self.store.save_user(&user)?;
        self.store.record_login_attempt(
            email,
            Some(user.id),
            Some(LoginFailure::InvalidPassword),
            ip_address,
        )?;

        match (locked, user.locked_until) {
            (true, Some(until)) => {
                tracing::warn!(user_id = user.id, until = %until, "Account locked after failed logins");
                Err(ServiceError::AccountLocked { until })
            }
            _ => Err(ServiceError::InvalidCredentials {
                remaining_attempts: Some(max.saturating_sub(user.failed_attempts)),
            }),
        }
    }

    fn reset_lockout(&self, mut user: User) -> ServiceResult<User> {
        user.is_locked = false;
        user.locked_until = None;
        user.failed_attempts = 0;
        user.last_failed_attempt_at = None;
        Ok(self.store.save_user(&user)?)
    }

    /// Resolve a bearer token to its session and user, refreshing
    /// `last_activity`. Expired sessions are deactivated on the way.
    pub fn validate(&self, token: &str) -> ServiceResult<(Session, User)> {
        let now = Utc::now();
        let session = self
            .store
            .get_session_by_token(token)?
            .ok_or_else(|| ServiceError::Unauthorized("invalid session token".into()))?;

        if !session.is_active {
            return Err(ServiceError::Unauthorized("session is no longer active".into()));
        }
        if session.expires_at <= now {
            self.store.deactivate_session(token)?;
            return Err(ServiceError::Unauthorized("session expired".into()));
        }

        let user = self
            .store
            .get_user(session.user_id)?
            .ok_or_else(|| ServiceError::Unauthorized("session user no longer exists".into()))?;

        self.store.touch_session(session.id, now)?;
        Ok((session, user))
    }

    pub fn logout(&self, token: &str) -> ServiceResult<()> {
        if !self.store.deactivate_session(token)? {
            return Err(ServiceError::Unauthorized(
                "session not found or already inactive".into(),
            ));
        }
        Ok(())
    }

    /// End every session of `user_id`; allowed for the user and managers
    pub fn logout_all(&self, actor: &User, user_id: i64) -> ServiceResult<usize> {
        ensure_self_or_manager(actor, user_id)?;
        let count = self.store.deactivate_user_sessions(user_id)?;
        tracing::info!(user_id, sessions = count, "All sessions closed");
        Ok(count)
    }

    pub fn unlock(&self, actor: &User, email: &str) -> ServiceResult<User> {
        if !actor.is_manager() {
            return Err(ServiceError::Forbidden("manager role required".into()));
        }
        let user = self
            .store
            .get_user_by_email(email)?
            .ok_or_else(|| not_found("user", email))?;

        let user = self.reset_lockout(user)?;
        tracing::info!(user_id = user.id, by = actor.id, "Account unlocked");
        Ok(user)
    }

    pub fn update_user(&self, actor: &User, id: i64, input: UpdateUserInput) -> ServiceResult<User> {
        ensure_self_or_manager(actor, id)?;
        let mut user = self.get_user(id)?;

        if let Some(name) = input.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ServiceError::Validation("name cannot be empty".into()));
            }
            user.name = name.to_string();
        }
        if let Some(email) = input.email {
            let email = email.trim().to_lowercase();
            if !is_valid_email(&email) {
                return Err(ServiceError::Validation(format!("invalid email: {}", email)));
            }
            user.email = email;
        }
        if let Some(password) = input.password {
            validate_password(&password)?;
            user.password_hash = hash_password(&password)?;
        }
        if let Some(role) = input.role {
            if role != user.role && !actor.is_manager() {
                return Err(ServiceError::Forbidden("only a manager can change roles".into()));
            }
            user.role = role;
        }

        user.firebase_synced = false;
        let user = self.store.save_user(&user)?;
        self.store
            .enqueue_sync(EntityType::User, user.id, SyncAction::Update, None, DEFAULT_PRIORITY)?;
        Ok(user)
    }

    pub fn get_user(&self, id: i64) -> ServiceResult<User> {
        self.store.get_user(id)?.ok_or_else(|| not_found("user", id))
    }

    pub fn list_users(&self) -> ServiceResult<Vec<User>> {
        Ok(self.store.list_users()?)
    }

    pub fn delete_user(&self, actor: &User, id: i64) -> ServiceResult<()> {
        if !actor.is_manager() {
            return Err(ServiceError::Forbidden("manager role required".into()));
        }
        if actor.id == id {
            return Err(ServiceError::Validation("a manager cannot delete their own account".into()));
        }
        if !self.store.delete_user(id)? {
            return Err(not_found("user", id));
        }
        tracing::info!(user_id = id, by = actor.id, "User deleted");
        Ok(())
    }

    /// Deactivate sessions past their expiry; returns how many
    pub fn cleanup_expired_sessions(&self) -> ServiceResult<usize> {
        let count = self.store.deactivate_expired_sessions(Utc::now())?;
        if count > 0 {
            tracing::info!(sessions = count, "Expired sessions deactivated");
        }
        Ok(count)
    }
}

fn validate_password(password: &str) -> ServiceResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "password must contain at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn ensure_self_or_manager(actor: &User, user_id: i64) -> ServiceResult<()> {
    if actor.id != user_id && !actor.is_manager() {
        return Err(ServiceError::Forbidden("cannot act on another account".into()));
    }
    Ok(())
}
