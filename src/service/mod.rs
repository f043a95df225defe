//! Voirie Business Rules
//!
//! Services sit between the HTTP handlers and the [`Store`](crate::storage::Store):
//!
//! - **auth**: Registration, login with lockout, sessions
//! - **signalements**: Reports, status transitions, proximity search
//! - **works**: Works records driving the signalement status
//! - **entreprises**: Contractor directory and ratings
//! - **photos**: Photo attachment and upload
//! - **budget**: Price per m² and budget estimation
//! - **dashboard**: Manager aggregates
//! - **notifier**: Persisted and live notifications
//!
//! Every service is synchronous and cheap to clone. Mutations that must
//! reach the remote store enqueue an outbox entry in the same call.

pub mod auth;
pub mod budget;
pub mod dashboard;
pub mod entreprises;
pub mod error;
pub mod geo;
pub mod notifier;
pub mod password;
pub mod photos;
pub mod signalements;
pub mod works;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthService, LoginResponse, RegisterInput, UpdateUserInput};
pub use budget::{compute_budget, BudgetEstimate, BudgetService};
pub use dashboard::{BudgetSummary, DashboardService, DashboardStatistics, Performance};
pub use entreprises::{EntrepriseInput, EntrepriseService, EntrepriseUpdate};
pub use error::{ServiceError, ServiceResult};
pub use notifier::Notifier;
pub use photos::PhotoService;
pub use signalements::{
    NearbySignalement, SignalementInput, SignalementService, SignalementStatistics,
    SignalementUpdate, StatusOption,
};
pub use works::{ActionInput, ActionStatistics, WorksService};
