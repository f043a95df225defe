//! External Integrations
//!
//! This module provides the data sources and sinks outside the database:
//! - Cloudinary (photo hosting, unsigned upload)
//! - CSV import of signalements
//! - Seed data (defaults and JSON seed files)

mod cloudinary;
mod csv_import;
pub mod seed;

pub use cloudinary::{data_uri, validate_image, CloudinaryUploader, PhotoUploader, UploadedPhoto};
pub use csv_import::{CsvImportResult, CsvImporter, RejectedRow};
pub use seed::{ensure_defaults, load_seed_file, SeedFile, SeedReport};

use crate::service::ServiceError;
use crate::storage::StorageError;

/// Errors that can occur during integration operations
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// A required setting is missing
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// The input was rejected before any remote call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}
