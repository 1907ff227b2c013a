//! Registry clients

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::time::Duration;
use templar_core::CollectionReference;
use tracing::{debug, warn};

use crate::manifest::{DOCKER_MANIFEST_MEDIA_TYPE, MANIFEST_MEDIA_TYPE};

pub use templar_core::RegistryFailure as RegistryError;

/// Access to raw manifests and blobs in a registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the manifest a reference points at
    async fn fetch_manifest(
        &self,
        reference: &CollectionReference,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryError>;

    /// Fetch a content-addressed blob from the reference's repository
    async fn fetch_blob(
        &self,
        reference: &CollectionReference,
        digest: &str,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryError>;
}

/// OCI distribution API client
pub struct OciRegistryClient {
    client: reqwest::Client,
    scheme: &'static str,
}

impl OciRegistryClient {
    /// Create a new client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Protocol(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Talk plain HTTP, for local registries
    pub fn with_plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    fn url(&self, reference: &CollectionReference, path: &str) -> Result<String, RegistryError> {
        let registry = reference.registry().ok_or_else(|| {
            RegistryError::Protocol(format!("reference '{}' names no registry", reference))
        })?;
        Ok(format!(
            "{}://{}/v2/{}/{}",
            self.scheme,
            registry,
            reference.repository(),
            path
        ))
    }

    async fn get(
        &self,
        url: &str,
        accept: &str,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryError> {
        let mut request = self.client.get(url).header(ACCEPT, accept);
        if let Some(token) = credential.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Registry request failed");
            RegistryError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Registry returned an error");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RegistryError::Unauthorized,
                StatusCode::NOT_FOUND => RegistryError::NotFound,
                StatusCode::TOO_MANY_REQUESTS => RegistryError::Unavailable(status.to_string()),
                s if s.is_server_error() => RegistryError::Unavailable(s.to_string()),
                s => RegistryError::Protocol(format!("unexpected status {}", s)),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        debug!(url = %url, size = body.len(), "Registry request succeeded");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn fetch_manifest(
        &self,
        reference: &CollectionReference,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = self.url(
            reference,
            &format!("manifests/{}", reference.version().as_str()),
        )?;
        let accept = format!("{}, {}", MANIFEST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE);
        self.get(&url, &accept, credential).await
    }

    async fn fetch_blob(
        &self,
        reference: &CollectionReference,
        digest: &str,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = self.url(reference, &format!("blobs/{}", digest))?;
        self.get(&url, "application/octet-stream", credential).await
    }
}
