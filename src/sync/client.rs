//! Remote document store
//!
//! [`RemoteStore`] is the seam the sync manager writes through.
//! [`FirestoreClient`] implements it over the Firestore REST v1 API.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::document::{parse_document, RemoteDocument};
use super::{SyncError, SyncResult};
use crate::config::SyncConfig;

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create or replace a document; `fields` are already Firestore-typed
    async fn put_document(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> SyncResult<()>;

    async fn get_document(&self, collection: &str, id: &str) -> SyncResult<Option<RemoteDocument>>;

    async fn list_documents(&self, collection: &str) -> SyncResult<Vec<RemoteDocument>>;

    /// Deleting a missing document is not an error
    async fn delete_document(&self, collection: &str, id: &str) -> SyncResult<()>;
}

pub struct FirestoreClient {
    client: Client,
    documents_url: String,
    api_key: Option<String>,
    auth_token: Option<String>,
    max_attempts: u32,
}

impl FirestoreClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        if config.project_id.trim().is_empty() {
            return Err(SyncError::NotConfigured("sync.project_id is empty".into()));
        }

        let client = Client::builder()
            .user_agent(concat!("Voirie/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Request(e.to_string()))?;

        let base = config
            .base_url
            .as_deref()
            .unwrap_or(FIRESTORE_BASE)
            .trim_end_matches('/');

        Ok(Self {
            client,
            documents_url: format!(
                "{}/projects/{}/databases/(default)/documents",
                base, config.project_id
            ),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            max_attempts: config.max_attempts.max(1),
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.documents_url,
            urlencoding::encode(collection),
            urlencoding::encode(id)
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            req = req.query(&[("key", key)]);
        }
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Send with retries. Timeouts, 5xx and 429 are retried after
    /// `attempt²` seconds (or the server's Retry-After on 429).
    async fn send<F>(&self, build: F) -> SyncResult<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let result = match build().send().await {
                Ok(response) => check_status(response).await,
                Err(e) => Err(SyncError::from(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = match &e {
                        SyncError::RateLimited { retry_after } => *retry_after,
                        _ => u64::from(attempt * attempt),
                    };
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay,
                        error = %e,
                        "Firestore request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(5);
        return Err(SyncError::RateLimited { retry_after });
    }

    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    if status.is_server_error() {
        return Err(SyncError::Unavailable(format!("{}: {}", status.as_u16(), message)));
    }
    Err(SyncError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteStore for FirestoreClient {
    async fn put_document(&self, collection: &str, id: &str, fields: &Map<String, Value>) -> SyncResult<()> {
        let url = self.document_url(collection, id);
        let body = json!({ "fields": fields });
        self.send(|| self.request(Method::PATCH, &url).json(&body)).await?;
        tracing::debug!(collection, id, "Document written");
        Ok(())
    }

    async fn get_document(&self, collection: &str, id: &str) -> SyncResult<Option<RemoteDocument>> {
        let url = self.document_url(collection, id);
        match self.send(|| self.request(Method::GET, &url)).await {
            Ok(response) => {
                let raw: Value = response
                    .json()
                    .await
                    .map_err(|e| SyncError::Encoding(e.to_string()))?;
                Ok(Some(parse_document(&raw)?))
            }
            Err(SyncError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_documents(&self, collection: &str) -> SyncResult<Vec<RemoteDocument>> {
        let url = format!("{}/{}", self.documents_url, urlencoding::encode(collection));
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.clone();
            let response = self
                .send(|| {
                    let mut req = self
                        .request(Method::GET, &url)
                        .query(&[("pageSize", PAGE_SIZE.to_string())]);
                    if let Some(token) = &token {
                        req = req.query(&[("pageToken", token)]);
                    }
                    req
                })
                .await?;

            let page: Value = response
                .json()
                .await
                .map_err(|e| SyncError::Encoding(e.to_string()))?;

            if let Some(docs) = page.get("documents").and_then(Value::as_array) {
                for raw in docs {
                    documents.push(parse_document(raw)?);
                }
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        tracing::debug!(collection, count = documents.len(), "Documents listed");
        Ok(documents)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> SyncResult<()> {
        let url = self.document_url(collection, id);
        match self.send(|| self.request(Method::DELETE, &url)).await {
            Ok(_) | Err(SyncError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(project: &str) -> SyncConfig {
        SyncConfig {
            project_id: project.to_string(),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_requires_project() {
        assert!(matches!(
            FirestoreClient::new(&config(" ")),
            Err(SyncError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_document_url_is_encoded() {
        let client = FirestoreClient::new(&config("voirie-tana")).unwrap();
        assert_eq!(
            client.document_url("signalements", "a b/c"),
            "https://firestore.googleapis.com/v1/projects/voirie-tana/databases/(default)/documents/signalements/a%20b%2Fc"
        );
    }

    #[test]
    fn test_base_url_override() {
        let mut cfg = config("demo");
        cfg.base_url = Some("http://localhost:8081/v1/".to_string());
        let client = FirestoreClient::new(&cfg).unwrap();
        assert_eq!(
            client.document_url("users", "1"),
            "http://localhost:8081/v1/projects/demo/databases/(default)/documents/users/1"
        );
    }
}
