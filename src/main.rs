//! Voirie API Server
//!
//! Run with: cargo run --bin voirie -- --config ./config.toml
//!
//! # Configuration
//!
//! Settings come from the TOML file given with `--config`, or from the
//! default locations (`~/.config/voirie/config.toml`,
//! `/etc/voirie/config.toml`, `./config.toml`). `VOIRIE_*` environment
//! variables override the file; `RUST_LOG` overrides the log level.

use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voirie::api::{serve, AppState};
use voirie::config::{Config, LoggingConfig};
use voirie::integrations::{ensure_defaults, load_seed_file, CloudinaryUploader};
use voirie::storage::{Store, StoreConfig};
use voirie::sync::{FirestoreClient, SyncManager, SyncSettings};

#[derive(Parser)]
#[command(name = "voirie")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Road-issue reporting API server")]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON seed file applied at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load_from(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.api.port = port;
    }

    init_logging(&config.logging)?;

    tracing::info!("Starting Voirie API server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", config.storage.database_path);

    let store = Store::open(&StoreConfig {
        path: PathBuf::from(&config.storage.database_path),
        busy_timeout_ms: config.storage.busy_timeout_ms,
    })
    .context("failed to open the database")?;

    let report = ensure_defaults(&store, &config)?;
    tracing::info!(
        configurations = report.configurations_created,
        users = report.users_created,
        "Defaults checked"
    );

    if let Some(path) = &args.seed {
        let report = load_seed_file(&store, path)
            .with_context(|| format!("failed to load seed file {:?}", path))?;
        tracing::info!(
            users = report.users_created,
            entreprises = report.entreprises_created,
            signalements = report.signalements_created,
            errors = report.errors.len(),
            "Seed file applied"
        );
        for error in &report.errors {
            tracing::warn!("Seed: {}", error);
        }
    }

    let mut state = AppState::new(config.clone(), store.clone());

    match config.cloudinary.clone() {
        Some(cloudinary) => {
            tracing::info!("Photo upload enabled (cloud: {})", cloudinary.cloud_name);
            let uploader = CloudinaryUploader::new(cloudinary)?;
            state = state.with_uploader(Arc::new(uploader));
        }
        None => tracing::info!("Photo upload disabled (no [cloudinary] section)"),
    }

    let sync_manager = if config.sync.enabled {
        match FirestoreClient::new(&config.sync) {
            Ok(client) => {
                tracing::info!("Firestore sync enabled for project {}", config.sync.project_id);
                let manager = Arc::new(SyncManager::new(
                    store.clone(),
                    Arc::new(client),
                    SyncSettings {
                        batch_size: config.sync.batch_size,
                        interval_secs: config.sync.interval_secs,
                    },
                ));
                Arc::clone(&manager).start();
                state = state.with_sync(Arc::clone(&manager));
                Some(manager)
            }
            Err(e) => {
                tracing::warn!("Firestore sync not started: {}", e);
                None
            }
        }
    } else {
        tracing::info!("Firestore sync disabled (set VOIRIE_SYNC_ENABLED=true to enable)");
        None
    };

    let sweeper = {
        let auth = state.auth.clone();
        let every = Duration::from_secs(config.auth.session_sweep_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = auth.cleanup_expired_sessions() {
                    tracing::warn!(error = %e, "Session sweep failed");
                }
            }
        })
    };

    serve(state).await?;

    sweeper.abort();
    if let Some(manager) = sync_manager {
        manager.stop().await;
    }
    tracing::info!("Voirie API server stopped");

    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("voirie={},tower_http=debug", config.level))
    });
    let registry = tracing_subscriber::registry().with(filter);
    let json = config.format.eq_ignore_ascii_case("json");

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path))?;
            let writer = Arc::new(file);
            if json {
                registry.with(fmt::layer().json().with_writer(writer)).init();
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
        }
        None if json => registry.with(fmt::layer().json()).init(),
        None => registry.with(fmt::layer()).init(),
    }
    Ok(())
}
