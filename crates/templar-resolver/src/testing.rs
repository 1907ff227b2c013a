//! Test doubles shared by the resolver tests

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use templar_core::{
    CollectionReference, RegistryFailure, Template, TemplateLayer, TemplateSet,
};
use templar_registry::RegistryClient;

pub fn digest_of(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

/// A single-layer set with one `{{ msg }}` template per name
pub fn template_set(names: &[&str]) -> TemplateSet {
    let mut layer = TemplateLayer {
        size: 10,
        ..Default::default()
    };
    for name in names {
        layer.insert(Template::parse(name, "{{ msg }}").unwrap());
    }
    TemplateSet::from_layers([layer])
}

/// In-memory registry that counts requests
#[derive(Default)]
pub struct MockRegistry {
    manifests: HashMap<String, Vec<u8>>,
    blobs: HashMap<String, Vec<u8>>,
    last_layers: Vec<String>,
    failing: HashMap<String, RegistryFailure>,
    tampered: bool,
    delay: Option<Duration>,
    manifest_fetches: AtomicUsize,
    blob_fetches: AtomicUsize,
}

impl MockRegistry {
    /// Publish a collection whose layers are packages of `(name, source)` pairs
    pub fn with_collection(mut self, reference: &str, layers: &[&[(&str, &str)]]) -> Self {
        let mut descriptors = Vec::new();
        self.last_layers.clear();
        for templates in layers {
            let blob = templar_store::pack_templates(templates.iter().copied()).unwrap();
            let digest = digest_of(&blob);
            descriptors.push(serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": digest,
                "size": blob.len(),
            }));
            self.last_layers.push(digest.clone());
            self.blobs.insert(digest, blob);
        }
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "layers": descriptors,
        });
        self.manifests
            .insert(reference.to_string(), serde_json::to_vec(&manifest).unwrap());
        self
    }

    pub fn with_manifest(mut self, reference: &str, manifest: Vec<u8>) -> Self {
        self.manifests.insert(reference.to_string(), manifest);
        self
    }

    /// Make the n-th layer of the last published collection fail
    pub fn failing_blob(mut self, index: usize, failure: RegistryFailure) -> Self {
        let digest = self.last_layers[index].clone();
        self.failing.insert(digest, failure);
        self
    }

    /// Serve blobs whose content does not match their digest
    pub fn tampered_blobs(mut self) -> Self {
        self.tampered = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn manifest_bytes(&self, reference: &str) -> Vec<u8> {
        self.manifests[reference].clone()
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifest_fetches.load(Ordering::SeqCst)
    }

    pub fn blob_fetches(&self) -> usize {
        self.blob_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn fetch_manifest(
        &self,
        reference: &CollectionReference,
        _credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryFailure> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.manifests
            .get(reference.as_str())
            .cloned()
            .ok_or(RegistryFailure::NotFound)
    }

    async fn fetch_blob(
        &self,
        _reference: &CollectionReference,
        digest: &str,
        _credential: Option<&str>,
    ) -> Result<Vec<u8>, RegistryFailure> {
        self.blob_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failing.get(digest) {
            return Err(failure.clone());
        }
        let mut blob = self.blobs.get(digest).cloned().ok_or(RegistryFailure::NotFound)?;
        if self.tampered {
            if let Some(last) = blob.last_mut() {
                *last ^= 0xff;
            }
        }
        Ok(blob)
    }
}
