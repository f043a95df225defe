//! Cloudinary photo hosting
//!
//! Unsigned uploads through an upload preset: the image is posted as a
//! base64 data URI and Cloudinary answers with the public `secure_url`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::IntegrationError;
use crate::config::CloudinaryConfig;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

/// Largest accepted upload (10 MiB)
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/heic"];

/// Where photos are hosted
#[async_trait]
pub trait PhotoUploader: Send + Sync {
    async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<UploadedPhoto, IntegrationError>;
}

/// Hosted photo returned by the uploader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedPhoto {
    pub secure_url: String,
    pub public_id: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

pub struct CloudinaryUploader {
    client: Client,
    config: CloudinaryConfig,
}

impl CloudinaryUploader {
    pub fn new(config: CloudinaryConfig) -> Result<Self, IntegrationError> {
        if config.cloud_name.trim().is_empty() || config.upload_preset.trim().is_empty() {
            return Err(IntegrationError::NotConfigured(
                "cloudinary cloud_name and upload_preset are required".into(),
            ));
        }
        let client = Client::builder()
            .user_agent(concat!("Voirie/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IntegrationError::ApiError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", API_BASE, self.config.cloud_name)
    }
}

/// `data:{content_type};base64,{payload}`
pub fn data_uri(bytes: &[u8], content_type: &str) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(bytes))
}

pub fn validate_image(bytes: &[u8], content_type: &str) -> Result<(), IntegrationError> {
    if bytes.is_empty() {
        return Err(IntegrationError::InvalidInput("empty file".into()));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(IntegrationError::InvalidInput(format!(
            "file too large ({} bytes, max {})",
            bytes.len(),
            MAX_UPLOAD_BYTES
        )));
    }
    if !ALLOWED_TYPES.contains(&content_type.to_ascii_lowercase().as_str()) {
        return Err(IntegrationError::InvalidInput(format!(
            "unsupported content type: {}",
            content_type
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorBody {
    error: CloudinaryErrorMessage,
}

#[derive(Debug, Deserialize)]
struct CloudinaryErrorMessage {
    message: String,
}

#[async_trait]
impl PhotoUploader for CloudinaryUploader {
    async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<UploadedPhoto, IntegrationError> {
        validate_image(bytes, content_type)?;

        let mut form = vec![
            ("file", data_uri(bytes, content_type)),
            ("upload_preset", self.config.upload_preset.clone()),
        ];
        if let Some(folder) = &self.config.folder {
            form.push(("folder", folder.clone()));
        }

        let response = self
            .client
            .post(self.upload_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| IntegrationError::ApiError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(IntegrationError::RateLimited(retry_after));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IntegrationError::AuthFailed(format!(
                "upload preset {} rejected",
                self.config.upload_preset
            )));
        }
        if !status.is_success() {
            let message = response
                .json::<CloudinaryErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("Cloudinary returned {}", status));
            return Err(IntegrationError::ApiError(message));
        }

        let uploaded: UploadedPhoto = response
            .json()
            .await
            .map_err(|e| IntegrationError::ParseError(e.to_string()))?;

        tracing::info!(
            public_id = %uploaded.public_id,
            bytes = bytes.len(),
            "Photo uploaded to Cloudinary"
        );
        Ok(uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CloudinaryConfig {
        CloudinaryConfig {
            cloud_name: "demo".to_string(),
            upload_preset: "voirie_unsigned".to_string(),
            folder: Some("signalements".to_string()),
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri(b"abc", "image/png"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_validate_image() {
        assert!(validate_image(b"\xff\xd8\xff", "image/jpeg").is_ok());
        assert!(validate_image(b"\xff\xd8\xff", "IMAGE/JPEG").is_ok());
        assert!(validate_image(b"", "image/jpeg").is_err());
        assert!(validate_image(b"%PDF", "application/pdf").is_err());
    }

    #[test]
    fn test_requires_configuration() {
        let mut missing = config();
        missing.upload_preset.clear();
        assert!(matches!(
            CloudinaryUploader::new(missing),
            Err(IntegrationError::NotConfigured(_))
        ));

        let uploader = CloudinaryUploader::new(config()).unwrap();
        assert_eq!(uploader.upload_url(), "https://api.cloudinary.com/v1_1/demo/image/upload");
    }

    #[test]
    fn test_parse_upload_response() {
        let body = r#"{"public_id":"signalements/abc","secure_url":"https://res.cloudinary.com/demo/image/upload/v1/signalements/abc.jpg","width":800,"height":600,"format":"jpg","bytes":12345,"etag":"x"}"#;
        let photo: UploadedPhoto = serde_json::from_str(body).unwrap();
        assert_eq!(photo.public_id, "signalements/abc");
        assert_eq!(photo.width, Some(800));
    }
}
