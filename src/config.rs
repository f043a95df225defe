//! Server configuration
//!
//! A TOML file (every section optional) layered under `VOIRIE_*`
//! environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub cloudinary: Option<CloudinaryConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("voirie").join("voirie.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./data/voirie.db".to_string())
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_ws_max_connections")]
    pub ws_max_connections: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ws_max_connections() -> usize {
    1000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:8100".to_string(),
            ],
            request_timeout_secs: default_request_timeout(),
            ws_max_connections: default_ws_max_connections(),
        }
    }
}

/// Account lockout, sessions and the bootstrap manager account
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,

    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,

    #[serde(default = "default_session_minutes")]
    pub session_minutes: i64,

    /// How often expired sessions are deactivated (seconds)
    #[serde(default = "default_session_sweep")]
    pub session_sweep_secs: u64,

    #[serde(default = "default_admin_email")]
    pub admin_email: String,

    /// No default manager is created when empty
    #[serde(default)]
    pub admin_password: String,

    #[serde(default = "default_admin_name")]
    pub admin_name: String,
}

fn default_max_login_attempts() -> u32 {
    3
}

fn default_lockout_minutes() -> i64 {
    30
}

fn default_session_minutes() -> i64 {
    30
}

fn default_session_sweep() -> u64 {
    300
}

fn default_admin_email() -> String {
    "manager@voirie.mg".to_string()
}

fn default_admin_name() -> String {
    "Manager".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
            lockout_minutes: default_lockout_minutes(),
            session_minutes: default_session_minutes(),
            session_sweep_secs: default_session_sweep(),
            admin_email: default_admin_email(),
            admin_password: String::new(),
            admin_name: default_admin_name(),
        }
    }
}

/// Budget estimation
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Used until a PRIX_PAR_M2 configuration row exists
    #[serde(default = "default_prix_par_m2")]
    pub default_prix_par_m2: f64,
}

fn default_prix_par_m2() -> f64 {
    10_000.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_prix_par_m2: default_prix_par_m2(),
        }
    }
}

/// Firestore synchronization
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub project_id: String,

    pub api_key: Option<String>,

    /// Bearer token sent with every request
    pub auth_token: Option<String>,

    /// Override of the Firestore REST root, e.g. an emulator
    pub base_url: Option<String>,

    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_sync_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_sync_batch")]
    pub batch_size: usize,
}

fn default_sync_interval() -> u64 {
    300
}

fn default_sync_timeout() -> u64 {
    30
}

fn default_sync_attempts() -> u32 {
    3
}

fn default_sync_batch() -> usize {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: String::new(),
            api_key: None,
            auth_token: None,
            base_url: None,
            interval_secs: default_sync_interval(),
            timeout_secs: default_sync_timeout(),
            max_attempts: default_sync_attempts(),
            batch_size: default_sync_batch(),
        }
    }
}

/// Cloudinary photo hosting (unsigned uploads)
#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,

    pub upload_preset: String,

    pub folder: Option<String>,

    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

fn default_upload_timeout() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Parses one TOML file, without environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_error = |e: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        };
        let parse_error = |e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        };
        std::fs::read_to_string(path)
            .map_err(io_error)
            .and_then(|text| toml::from_str(&text).map_err(parse_error))
    }

    /// An explicit path must exist and parse; without one the usual
    /// locations are searched. `VOIRIE_*` variables apply in both cases.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::search().unwrap_or_default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Never fails: a broken file is logged and skipped
    pub fn load_default() -> Self {
        let mut config = Self::search().unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("voirie").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/voirie/config.toml"));
        paths.push(PathBuf::from("./config.toml"));
        paths
    }

    fn search() -> Option<Self> {
        let found = Self::candidate_paths()
            .into_iter()
            .filter(|path| path.is_file())
            .find_map(|path| match Self::load(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Configuration file loaded");
                    Some(config)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Configuration file skipped");
                    None
                }
            });
        if found.is_none() {
            tracing::info!("No configuration file, built-in defaults apply");
        }
        found
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("VOIRIE_DATABASE_PATH") {
            self.storage.database_path = path;
        }

        if let Some(host) = var("VOIRIE_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("VOIRIE_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        if let Some(level) = var("VOIRIE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("VOIRIE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(project) = var("VOIRIE_FIREBASE_PROJECT_ID") {
            self.sync.project_id = project;
        }
        if let Some(key) = var("VOIRIE_FIREBASE_API_KEY") {
            self.sync.api_key = Some(key);
        }
        if let Some(enabled) = var("VOIRIE_SYNC_ENABLED") {
            self.sync.enabled = matches!(enabled.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        let cloud_name = var("VOIRIE_CLOUDINARY_CLOUD_NAME");
        let upload_preset = var("VOIRIE_CLOUDINARY_UPLOAD_PRESET");
        if cloud_name.is_some() || upload_preset.is_some() {
            let cloudinary = self.cloudinary.get_or_insert_with(|| CloudinaryConfig {
                cloud_name: String::new(),
                upload_preset: String::new(),
                folder: None,
                timeout_secs: default_upload_timeout(),
            });
            if let Some(name) = cloud_name {
                cloudinary.cloud_name = name;
            }
            if let Some(preset) = upload_preset {
                cloudinary.upload_preset = preset;
            }
        }

        if let Some(email) = var("VOIRIE_ADMIN_EMAIL") {
            self.auth.admin_email = email;
        }
        if let Some(password) = var("VOIRIE_ADMIN_PASSWORD") {
            self.auth.admin_password = password;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("invalid configuration in {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Commented template written by `voirie-cli config`
pub fn generate_default_config() -> String {
    r#"# Voirie Configuration
#
# Environment variables override these settings:
# - VOIRIE_DATABASE_PATH
# - VOIRIE_API_HOST
# - VOIRIE_API_PORT
# - VOIRIE_LOG_LEVEL
# - VOIRIE_LOG_FORMAT
# - VOIRIE_FIREBASE_PROJECT_ID
# - VOIRIE_FIREBASE_API_KEY
# - VOIRIE_SYNC_ENABLED
# - VOIRIE_CLOUDINARY_CLOUD_NAME
# - VOIRIE_CLOUDINARY_UPLOAD_PRESET
# - VOIRIE_ADMIN_EMAIL
# - VOIRIE_ADMIN_PASSWORD

[storage]
# SQLite database file
database_path = "./data/voirie.db"

# How long a writer waits on a locked database (ms)
busy_timeout_ms = 5000

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8080

# Allowed CORS origins (web back-office and mobile app)
cors_origins = ["http://localhost:5173", "http://localhost:8100"]

# Request timeout in seconds
request_timeout_secs = 30

# Maximum concurrent WebSocket connections
ws_max_connections = 1000

[auth]
# Failed logins before the account is locked
max_login_attempts = 3

# Lock duration (minutes)
lockout_minutes = 30

# Session lifetime (minutes)
session_minutes = 30

# Expired session sweep interval (seconds)
session_sweep_secs = 300

# Default manager account, created at startup when absent
admin_email = "manager@voirie.mg"
admin_password = ""
admin_name = "Manager"

[budget]
# Price per m² used until PRIX_PAR_M2 is configured
default_prix_par_m2 = 10000.0

[sync]
# Enable Firestore synchronization
enabled = false

# Firebase project
project_id = ""
# api_key = ""

# Seconds between background sync runs
interval_secs = 300

# Request timeout and attempts per request
timeout_secs = 30
max_attempts = 3

# Outbox entries pushed per run
batch_size = 100

# [cloudinary]
# cloud_name = ""
# upload_preset = ""
# folder = "signalements"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/voirie/voirie.log"
"#
    .to_string()
}
