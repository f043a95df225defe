//! API Routes
//!
//! Route handlers organized by functionality.

pub mod actions;
pub mod auth;
pub mod configurations;
pub mod dashboard;
pub mod entreprises;
pub mod export;
pub mod health;
pub mod import;
pub mod notifications;
pub mod photos;
pub mod signalements;
pub mod sync;
