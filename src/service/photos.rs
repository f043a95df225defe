//! Signalement photos

use std::sync::Arc;

use crate::integrations::{IntegrationError, PhotoUploader};
use crate::storage::{PhotoSignalement, Store, User};

use super::error::{not_found, ServiceError, ServiceResult};

#[derive(Clone)]
pub struct PhotoService {
    store: Store,
    uploader: Option<Arc<dyn PhotoUploader>>,
}

impl PhotoService {
    /// Without an uploader only already-hosted URLs can be attached
    pub fn new(store: Store, uploader: Option<Arc<dyn PhotoUploader>>) -> Self {
        Self { store, uploader }
    }

    /// Attach a hosted photo; the first one becomes the main photo
    pub fn add(
        &self,
        signalement_id: i64,
        url: &str,
        description: Option<&str>,
        by: Option<&User>,
    ) -> ServiceResult<PhotoSignalement> {
        let url = url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ServiceError::Validation(format!("invalid photo url: {}", url)));
        }
        self.ensure_signalement(signalement_id)?;

        let description = description.map(str::trim).filter(|d| !d.is_empty());
        let photo = self
            .store
            .insert_photo(signalement_id, url, description, by.map(|u| u.id))?;

        tracing::debug!(photo_id = photo.id, signalement_id, ordre = photo.ordre, "Photo added");
        Ok(photo)
    }

    /// Host the bytes with the configured uploader, then attach the URL
    pub async fn upload(
        &self,
        signalement_id: i64,
        bytes: Vec<u8>,
        content_type: &str,
        description: Option<&str>,
        by: Option<&User>,
    ) -> ServiceResult<PhotoSignalement> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| ServiceError::Upload("photo upload is not configured".into()))?;
        self.ensure_signalement(signalement_id)?;

        let hosted = uploader
            .upload(&bytes, content_type)
            .await
            .map_err(|e| match e {
                IntegrationError::InvalidInput(msg) => ServiceError::Validation(msg),
                other => ServiceError::Upload(other.to_string()),
            })?;

        self.add(signalement_id, &hosted.secure_url, description, by)
    }

    pub fn get(&self, id: i64) -> ServiceResult<PhotoSignalement> {
        self.store.get_photo(id)?.ok_or_else(|| not_found("photo", id))
    }

    pub fn list(&self, signalement_id: i64) -> ServiceResult<Vec<PhotoSignalement>> {
        Ok(self.store.list_photos(signalement_id)?)
    }

    pub fn principale(&self, signalement_id: i64) -> ServiceResult<PhotoSignalement> {
        self.store
            .principale_photo(signalement_id)?
            .ok_or_else(|| not_found("main photo of signalement", signalement_id))
    }

    pub fn set_principale(&self, photo_id: i64) -> ServiceResult<PhotoSignalement> {
        self.get(photo_id)?;
        Ok(self.store.set_principale_photo(photo_id)?)
    }

    /// Delete a photo; when it was the main one the next photo takes over
    pub fn delete(&self, photo_id: i64) -> ServiceResult<()> {
        if !self.store.delete_photo(photo_id)? {
            return Err(not_found("photo", photo_id));
        }
        Ok(())
    }

    pub fn reorder(&self, signalement_id: i64, photo_ids: &[i64]) -> ServiceResult<Vec<PhotoSignalement>> {
        if photo_ids.is_empty() {
            return Err(ServiceError::Validation("photo_ids cannot be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        if !photo_ids.iter().all(|id| seen.insert(*id)) {
            return Err(ServiceError::Validation("photo_ids contains duplicates".into()));
        }

        self.ensure_signalement(signalement_id)?;
        self.store.reorder_photos(signalement_id, photo_ids)?;
        self.list(signalement_id)
    }

    fn ensure_signalement(&self, id: i64) -> ServiceResult<()> {
        match self.store.get_signalement(id)? {
            Some(_) => Ok(()),
            None => Err(not_found("signalement", id)),
        }
    }
}
