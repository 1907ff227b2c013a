//! Collection provider factory

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use templar_core::{
    CollectionReference, ConvertDataConfig, DataType, TemplateManagementError, TemplateSet,
};
use templar_registry::RegistryClient;
use tracing::{debug, info};

use crate::artifact::{Artifact, ArtifactCache, CacheKey};
use crate::provider::CollectionProvider;

/// Where a reference is resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionSource {
    /// Built-in default collection (or its validated override)
    Default(DataType),
    /// Remote registry
    Registry,
}

/// Per-data-type default collections that survive cache eviction
#[derive(Default)]
pub(crate) struct DefaultTemplates {
    overrides: RwLock<HashMap<DataType, Arc<TemplateSet>>>,
}

impl DefaultTemplates {
    /// The override for a data type, falling back to the built-in collection
    pub(crate) fn templates(&self, data_type: DataType) -> anyhow::Result<Arc<TemplateSet>> {
        if let Some(templates) = self.overrides.read().get(&data_type) {
            return Ok(Arc::clone(templates));
        }
        let templates = templar_store::builtin_templates(data_type).map_err(|e| {
            anyhow::anyhow!("built-in templates for {} are unusable: {}", data_type, e)
        })?;
        Ok(Arc::new(templates))
    }
}

/// Settings every provider is created with
#[derive(Debug, Clone)]
pub(crate) struct ProviderSettings {
    pub timeout: Duration,
    pub collection_size_limit: u64,
}

/// Builds providers bound to one reference and credential.
///
/// Holds shared handles only, so it can be used concurrently.
pub struct CollectionProviderFactory {
    cache: Arc<ArtifactCache>,
    client: Arc<dyn RegistryClient>,
    defaults: Arc<DefaultTemplates>,
    settings: ProviderSettings,
    enabled: bool,
    allowed_registries: Vec<String>,
}

impl CollectionProviderFactory {
    /// Create a new factory
    pub fn new(
        cache: Arc<ArtifactCache>,
        client: Arc<dyn RegistryClient>,
        config: &ConvertDataConfig,
    ) -> Self {
        Self {
            cache,
            client,
            defaults: Arc::new(DefaultTemplates::default()),
            settings: ProviderSettings {
                timeout: config.operation_timeout(),
                collection_size_limit: config.template_collection_size_limit,
            },
            enabled: config.enabled,
            allowed_registries: config
                .container_registry_servers
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Decide where a reference resolves from, or reject it
    pub fn select_source(
        &self,
        reference: &CollectionReference,
    ) -> Result<CollectionSource, TemplateManagementError> {
        let rejected = |reason: String| TemplateManagementError::ReferenceRejected {
            reference: reference.to_string(),
            reason,
        };

        if !self.enabled {
            return Err(rejected("template conversion is disabled".to_string()));
        }
        if let Some(data_type) = DataType::from_default_reference(reference.as_str()) {
            return Ok(CollectionSource::Default(data_type));
        }
        match reference.registry() {
            Some(registry) if self.allowed_registries.iter().any(|r| r == registry) => {
                Ok(CollectionSource::Registry)
            }
            Some(registry) => Err(rejected(format!(
                "registry '{}' is not configured",
                registry
            ))),
            None => Err(rejected("reference names no registry".to_string())),
        }
    }

    /// Create a provider for a reference and optional credential
    pub fn create_provider(
        &self,
        reference: &CollectionReference,
        credential: Option<String>,
    ) -> Result<CollectionProvider, TemplateManagementError> {
        let source = self.select_source(reference)?;
        debug!(reference = %reference, source = ?source, "Creating collection provider");

        Ok(CollectionProvider::new(
            reference.clone(),
            source,
            credential,
            Arc::clone(&self.cache),
            Arc::clone(&self.client),
            Arc::clone(&self.defaults),
            self.settings.clone(),
        ))
    }

    /// Replace the default collection for a data type.
    ///
    /// The set must already be validated. Returns whether it also fit in the cache.
    pub fn init_default_templates(&self, data_type: DataType, templates: TemplateSet) -> bool {
        let templates = Arc::new(templates);
        let size = templates.size();
        self.defaults
            .overrides
            .write()
            .insert(data_type, Arc::clone(&templates));

        let key = CacheKey::Collection(data_type.default_reference().to_string());
        self.cache.remove(&key);
        let cached = self.cache.set(key, Artifact::Templates(templates), size);

        info!(
            data_type = %data_type,
            reference = data_type.default_reference(),
            size = size,
            cached = cached,
            "Default templates replaced"
        );
        cached
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }
}
