//! Collection provider
//!
//! Resolution order for one reference:
//! 1. the parsed collection in the cache
//! 2. for default references, the override or built-in collection
//! 3. for registry references, manifest -> missing layers -> parse, then
//!    every fetched artifact and the final set are cached
//!
//! Nothing is written to the cache until the whole pipeline has succeeded.

use std::fmt;
use std::sync::Arc;
use templar_core::{
    CancellationToken, CollectionReference, ReferenceVersion, ResolveError,
    TemplateManagementError, TemplateSet,
};
use templar_registry::{verify_digest, Manifest, RegistryClient};
use tracing::{debug, info};

use crate::artifact::{Artifact, ArtifactCache, CacheKey};
use crate::factory::{CollectionSource, DefaultTemplates, ProviderSettings};

/// Where a resolved collection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    BuiltIn,
    Registry,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::Cache => write!(f, "cache"),
            ResolutionSource::BuiltIn => write!(f, "built-in"),
            ResolutionSource::Registry => write!(f, "registry"),
        }
    }
}

/// A resolved collection
#[derive(Debug, Clone)]
pub struct Resolution {
    pub templates: Arc<TemplateSet>,
    pub source: ResolutionSource,
}

/// Artifacts fetched by one pipeline run, cached only on success
struct Fetched {
    templates: TemplateSet,
    manifest: Option<(Arc<Manifest>, u64)>,
    layers: Vec<Arc<templar_core::TemplateLayer>>,
}

/// Resolves one reference into a template set
pub struct CollectionProvider {
    reference: CollectionReference,
    source: CollectionSource,
    credential: Option<String>,
    cache: Arc<ArtifactCache>,
    client: Arc<dyn RegistryClient>,
    defaults: Arc<DefaultTemplates>,
    settings: ProviderSettings,
}

impl CollectionProvider {
    pub(crate) fn new(
        reference: CollectionReference,
        source: CollectionSource,
        credential: Option<String>,
        cache: Arc<ArtifactCache>,
        client: Arc<dyn RegistryClient>,
        defaults: Arc<DefaultTemplates>,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            reference,
            source,
            credential,
            cache,
            client,
            defaults,
            settings,
        }
    }

    pub fn reference(&self) -> &CollectionReference {
        &self.reference
    }

    /// Resolve the collection
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<Resolution, ResolveError> {
        if cancel.is_cancelled() {
            return Err(TemplateManagementError::Cancelled.into());
        }
        if self.cache.is_disposed() {
            return Err(anyhow::anyhow!("template cache has been disposed").into());
        }

        let key = CacheKey::Collection(self.reference.as_str().to_string());
        if let Some(Artifact::Templates(templates)) = self.cache.get(&key) {
            debug!(reference = %self.reference, "Template collection cache hit");
            return Ok(Resolution {
                templates,
                source: ResolutionSource::Cache,
            });
        }
        debug!(reference = %self.reference, "Template collection cache miss");

        match self.source {
            CollectionSource::Default(data_type) => {
                let templates = self.defaults.templates(data_type)?;
                self.cache.set(
                    key,
                    Artifact::Templates(Arc::clone(&templates)),
                    templates.size(),
                );
                Ok(Resolution {
                    templates,
                    source: ResolutionSource::BuiltIn,
                })
            }
            CollectionSource::Registry => {
                let timeout = self.settings.timeout;
                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(TemplateManagementError::Cancelled.into());
                    }
                    result = tokio::time::timeout(timeout, self.fetch(cancel)) => {
                        result.map_err(|_| TemplateManagementError::TimedOut(timeout))??
                    }
                };
                Ok(Resolution {
                    templates: self.store(key, fetched),
                    source: ResolutionSource::Registry,
                })
            }
        }
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Fetched, ResolveError> {
        let (manifest, fetched_manifest) = self.manifest().await?;

        let total = manifest.total_layer_size();
        if total > self.settings.collection_size_limit {
            return Err(TemplateManagementError::CollectionTooLarge {
                reference: self.reference.to_string(),
                size: total,
                limit: self.settings.collection_size_limit,
            }
            .into());
        }

        let mut layers = Vec::with_capacity(manifest.layers.len());
        let mut fetched_layers = Vec::new();
        for descriptor in &manifest.layers {
            if cancel.is_cancelled() {
                return Err(TemplateManagementError::Cancelled.into());
            }

            if let Some(Artifact::Layer(layer)) =
                self.cache.get(&CacheKey::Layer(descriptor.digest.clone()))
            {
                debug!(digest = %descriptor.digest, "Layer cache hit");
                layers.push(layer);
                continue;
            }

            let blob = self
                .client
                .fetch_blob(&self.reference, &descriptor.digest, self.credential.as_deref())
                .await
                .map_err(|failure| self.registry_error(failure))?;
            if blob.len() as u64 != descriptor.size {
                return Err(TemplateManagementError::LayerSizeMismatch {
                    digest: descriptor.digest.clone(),
                    declared: descriptor.size,
                    actual: blob.len() as u64,
                }
                .into());
            }
            if !verify_digest(&descriptor.digest, &blob) {
                return Err(TemplateManagementError::DigestMismatch {
                    digest: descriptor.digest.clone(),
                }
                .into());
            }

            let layer = Arc::new(templar_store::read_package(&blob, &descriptor.digest)?);
            fetched_layers.push(Arc::clone(&layer));
            layers.push(layer);
        }

        // Later manifest layers override earlier ones
        let templates = TemplateSet::from_layers(layers.iter().rev().map(|l| (**l).clone()));

        Ok(Fetched {
            templates,
            manifest: fetched_manifest.map(|size| (Arc::clone(&manifest), size)),
            layers: fetched_layers,
        })
    }

    /// The manifest, plus its byte size when it was freshly fetched
    async fn manifest(&self) -> Result<(Arc<Manifest>, Option<u64>), ResolveError> {
        let key = CacheKey::Manifest(self.reference.as_str().to_string());
        if let Some(Artifact::Manifest(manifest)) = self.cache.get(&key) {
            debug!(reference = %self.reference, "Manifest cache hit");
            return Ok((manifest, None));
        }

        let bytes = self
            .client
            .fetch_manifest(&self.reference, self.credential.as_deref())
            .await
            .map_err(|failure| self.registry_error(failure))?;

        if let ReferenceVersion::Digest(digest) = self.reference.version() {
            if !verify_digest(digest, &bytes) {
                return Err(TemplateManagementError::DigestMismatch {
                    digest: digest.clone(),
                }
                .into());
            }
        }

        let manifest = Manifest::parse(self.reference.as_str(), &bytes)?;
        Ok((Arc::new(manifest), Some(bytes.len() as u64)))
    }

    fn store(&self, key: CacheKey, fetched: Fetched) -> Arc<TemplateSet> {
        if let Some((manifest, size)) = fetched.manifest {
            self.cache.set(
                CacheKey::Manifest(self.reference.as_str().to_string()),
                Artifact::Manifest(manifest),
                size,
            );
        }
        for layer in fetched.layers {
            let size = layer.size;
            self.cache
                .set(CacheKey::Layer(layer.digest.clone()), Artifact::Layer(layer), size);
        }

        let templates = Arc::new(fetched.templates);
        self.cache.set(
            key,
            Artifact::Templates(Arc::clone(&templates)),
            templates.size(),
        );

        info!(
            reference = %self.reference,
            templates = templates.template_names().len(),
            size = templates.size(),
            "Template collection fetched"
        );
        templates
    }

    fn registry_error(&self, failure: templar_core::RegistryFailure) -> ResolveError {
        TemplateManagementError::Registry {
            reference: self.reference.to_string(),
            failure,
        }
        .into()
    }
}
