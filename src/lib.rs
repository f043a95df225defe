//! # Voirie
//!
//! Backend for citizen road-issue reporting. Citizens report defects
//! (signalements) with a position and photos; managers schedule works,
//! assign contractors and follow the budget. Every record is mirrored to a
//! Firestore project shared with the mobile and web clients.
//!
//! ## Modules
//!
//! - [`storage`]: SQLite persistence and the sync outbox
//! - [`service`]: Business rules (auth, signalements, works, budget, ...)
//! - [`sync`]: Push/pull against Firestore with last-write-wins
//! - [`api`]: REST API server with Axum
//! - [`websocket`]: Live events for dashboards
//! - [`integrations`]: Cloudinary upload, CSV import, seeding
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voirie::config::Config;
//! use voirie::integrations::ensure_defaults;
//! use voirie::storage::{Store, StoreConfig};
//! use voirie::{serve, AppState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     let store = Store::open(&StoreConfig::new(&config.storage.database_path))?;
//!     ensure_defaults(&store, &config)?;
//!
//!     serve(AppState::new(config, store)).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod integrations;
pub mod service;
pub mod storage;
pub mod sync;
pub mod websocket;

// Re-export top-level types for convenience
pub use storage::{
    Entreprise, Role, Signalement, SignalementAction, SignalementFilter, Statut, StorageError,
    StorageResult, Store, StoreConfig, User,
};

pub use service::{ServiceError, ServiceResult};

pub use api::{build_router, serve, ApiError, AppState};

pub use sync::{FirestoreClient, RemoteStore, SyncError, SyncManager, SyncReport, SyncSettings};

pub use websocket::{
    ClientMessage, ConnectionHub, HubConfig, HubError, ServerMessage, WsEvent,
    websocket_handler,
};

pub use config::{Config, ConfigError, LoggingConfig};

pub use integrations::{
    CloudinaryUploader, CsvImportResult, CsvImporter, IntegrationError, PhotoUploader,
};
