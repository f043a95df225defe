//! Application State
//!
//! Services and the live hub, shared by every handler.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::integrations::PhotoUploader;
use crate::service::{
    AuthService, BudgetService, DashboardService, EntrepriseService, Notifier, PhotoService,
    SignalementService, WorksService,
};
use crate::storage::Store;
use crate::sync::SyncManager;
use crate::websocket::{ConnectionHub, HubConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub auth: AuthService,
    pub signalements: SignalementService,
    pub works: WorksService,
    pub entreprises: EntrepriseService,
    pub photos: PhotoService,
    pub budget: BudgetService,
    pub dashboard: DashboardService,
    pub notifier: Notifier,
    /// WebSocket connection hub for live events
    pub ws_hub: Arc<ConnectionHub>,
    /// Remote synchronization, absent when disabled
    pub sync: Option<Arc<SyncManager>>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every service over one store. Photo upload and sync start
    /// disabled; see [`AppState::with_uploader`] and [`AppState::with_sync`].
    pub fn new(config: Config, store: Store) -> Self {
        let ws_hub = Arc::new(ConnectionHub::new(HubConfig {
            max_connections: config.api.ws_max_connections,
            ..HubConfig::default()
        }));

        let notifier = Notifier::new(store.clone(), Some(Arc::clone(&ws_hub)));
        let budget = BudgetService::new(store.clone(), config.budget.default_prix_par_m2);
        let signalements = SignalementService::new(store.clone(), budget.clone(), notifier.clone());
        let works = WorksService::new(store.clone(), signalements.clone(), notifier.clone());

        Self {
            auth: AuthService::new(store.clone(), config.auth.clone()),
            entreprises: EntrepriseService::new(store.clone()),
            photos: PhotoService::new(store.clone(), None),
            dashboard: DashboardService::new(store.clone()),
            signalements,
            works,
            budget,
            notifier,
            ws_hub,
            sync: None,
            config: Arc::new(config),
            store,
            start_time: Instant::now(),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn PhotoUploader>) -> Self {
        self.photos = PhotoService::new(self.store.clone(), Some(uploader));
        self
    }

    pub fn with_sync(mut self, sync: Arc<SyncManager>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn ws_connection_count(&self) -> usize {
        self.ws_hub.connection_count().await
    }

    /// Socket address the server binds to
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.api.host, self.config.api.port)
    }
}
