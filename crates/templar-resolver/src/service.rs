//! Template resolution service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use templar_core::{
    CancellationToken, CollectionReference, ConvertDataConfig, RegistryFailure, ResolveError,
    TemplarError, TemplarResult, TemplateManagementError, TemplateSet,
};
use templar_registry::{OciRegistryClient, RegistryClient, StaticTokenProvider, TokenProvider};
use templar_store::CacheStats;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactCache, CacheKey};
use crate::factory::{CollectionProviderFactory, CollectionSource};
use crate::overrides::OverrideInitializer;
use crate::provider::Resolution;

/// A conversion request's view of its template collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRequest {
    pub template_collection_reference: String,
}

impl TemplateRequest {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            template_collection_reference: reference.into(),
        }
    }
}

/// Entry point for resolving template collections.
///
/// Construction applies any configured overrides before returning, so a
/// service value is always fully initialized. Dropping it disposes the cache.
pub struct TemplateResolutionService {
    config: ConvertDataConfig,
    cache: Arc<ArtifactCache>,
    factory: CollectionProviderFactory,
    tokens: Arc<dyn TokenProvider>,
    disposed: AtomicBool,
}

impl TemplateResolutionService {
    /// Create a new service
    pub fn new(
        config: ConvertDataConfig,
        client: Arc<dyn RegistryClient>,
        tokens: Arc<dyn TokenProvider>,
    ) -> TemplarResult<Self> {
        config.validate()?;

        let cache = Arc::new(ArtifactCache::new(config.cache_size_limit));
        let factory = CollectionProviderFactory::new(Arc::clone(&cache), client, &config);

        if let Err(e) = OverrideInitializer::new(&factory).run(&config.overrides()) {
            cache.dispose();
            error!(error = %e, "Failed to initialize default templates");
            return Err(e);
        }

        info!(
            cache_size_limit = config.cache_size_limit,
            registries = config.container_registry_servers.len(),
            "Template resolution service initialized"
        );

        Ok(Self {
            config,
            cache,
            factory,
            tokens,
            disposed: AtomicBool::new(false),
        })
    }

    /// Create a service talking to real registries with anonymous access
    pub fn with_oci_registry(config: ConvertDataConfig) -> TemplarResult<Self> {
        let client = OciRegistryClient::new(config.operation_timeout()).map_err(|e| {
            TemplarError::ConfigurationInvalid(format!("registry client: {}", e))
        })?;
        Self::new(
            config,
            Arc::new(client),
            Arc::new(StaticTokenProvider::anonymous()),
        )
    }

    /// Resolve the template collection a request refers to
    pub async fn resolve(
        &self,
        request: &TemplateRequest,
        cancel: &CancellationToken,
    ) -> TemplarResult<Arc<TemplateSet>> {
        let reference = &request.template_collection_reference;
        let attempt_id = Uuid::new_v4();
        let started = Instant::now();

        let result = self.resolve_reference(reference, cancel).await;
        let elapsed = started.elapsed();

        match result {
            Ok(resolution) => {
                if self.config.enable_telemetry_logger {
                    info!(
                        target: "templar::telemetry",
                        attempt_id = %attempt_id,
                        reference = %reference,
                        source = %resolution.source,
                        hit = resolution.source == crate::ResolutionSource::Cache,
                        duration_ms = elapsed.as_millis() as u64,
                        "Template collection resolved"
                    );
                }
                Ok(resolution.templates)
            }
            Err(e) => {
                if e.is_expected() {
                    warn!(reference = %reference, error = %e, "Template collection is invalid");
                } else {
                    error!(
                        reference = %reference,
                        error = ?e,
                        "Unhandled failure while getting template collection"
                    );
                }
                if self.config.enable_telemetry_logger {
                    info!(
                        target: "templar::telemetry",
                        attempt_id = %attempt_id,
                        reference = %reference,
                        outcome = "failed",
                        duration_ms = elapsed.as_millis() as u64,
                        "Template collection resolution failed"
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn resolve_reference(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        if self.is_disposed() {
            return Err(anyhow::anyhow!("template resolution service has been disposed").into());
        }

        let reference = CollectionReference::parse(raw)?;
        let credential = match self.factory.select_source(&reference)? {
            CollectionSource::Default(_) => None,
            CollectionSource::Registry => Some(self.credential(&reference, cancel).await?),
        };

        let provider = self.factory.create_provider(&reference, credential)?;
        let result = provider.resolve(cancel).await;

        // Tokens are cached without expiry; drop one the registry refused.
        if let Err(ResolveError::Expected(TemplateManagementError::Registry {
            failure: RegistryFailure::Unauthorized,
            ..
        })) = &result
        {
            if let Some(registry) = reference.registry() {
                self.cache
                    .remove(&CacheKey::Credential(registry.to_string()));
            }
        }
        result
    }

    /// Registry credential, from the cache or the token provider
    async fn credential(
        &self,
        reference: &CollectionReference,
        cancel: &CancellationToken,
    ) -> Result<String, ResolveError> {
        let registry = reference.registry().unwrap_or_default().to_string();
        let key = CacheKey::Credential(registry.clone());
        if let Some(Artifact::Credential(token)) = self.cache.get(&key) {
            return Ok(token);
        }

        let timeout = self.config.operation_timeout();
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TemplateManagementError::Cancelled.into());
            }
            result = tokio::time::timeout(
                timeout,
                self.tokens.access_token(&self.config.acr_target_resource_uri, &registry),
            ) => {
                result
                    .map_err(|_| TemplateManagementError::TimedOut(timeout))?
                    .map_err(|e| TemplateManagementError::CredentialFailed {
                        registry: registry.clone(),
                        reason: e.to_string(),
                    })?
            }
        };

        if !token.is_empty() {
            let size = token.len() as u64;
            self.cache.set(key, Artifact::Credential(token.clone()), size);
        }
        Ok(token)
    }

    /// Release the cache. Only the first call does anything.
    pub fn dispose(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.cache.dispose();
        info!("Template resolution service disposed");
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Drop for TemplateResolutionService {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRegistry;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use templar_core::{CustomTemplatesConfig, DataType};
    use templar_registry::TokenError;

    const DEFAULT_HL7: &str = "microsofthealth/hl7v2templates:default";
    const REMOTE: &str = "myacr.azurecr.io/hl7:v1";

    #[derive(Default)]
    struct CountingTokens {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenProvider for CountingTokens {
        async fn access_token(&self, resource: &str, _registry: &str) -> Result<String, TokenError> {
            assert_eq!(resource, "https://management.azure.com/");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TokenError("no identity".to_string()));
            }
            Ok("token".to_string())
        }
    }

    fn remote_config() -> ConvertDataConfig {
        ConvertDataConfig {
            container_registry_servers: vec!["myacr.azurecr.io".to_string()],
            enable_telemetry_logger: true,
            ..Default::default()
        }
    }

    fn service(
        config: ConvertDataConfig,
        registry: MockRegistry,
    ) -> (TemplateResolutionService, Arc<MockRegistry>, Arc<CountingTokens>) {
        let registry = Arc::new(registry);
        let tokens = Arc::new(CountingTokens::default());
        let service =
            TemplateResolutionService::new(config, registry.clone(), tokens.clone()).unwrap();
        (service, registry, tokens)
    }

    fn package(templates: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Hl7v2.tar.gz");
        std::fs::write(
            &path,
            templar_store::pack_templates(templates.iter().copied()).unwrap(),
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_default_reference_served_from_cache() {
        let config = ConvertDataConfig {
            cache_size_limit: 1000,
            ..Default::default()
        };
        let (service, registry, _) = service(config, MockRegistry::default());
        let request = TemplateRequest::new(DEFAULT_HL7);

        let first = service
            .resolve(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.is_empty());
        let entries = service.cache_stats().entry_count;
        assert_eq!(entries, 1);

        let second = service
            .resolve(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.manifest_fetches(), 0);
        assert_eq!(registry.blob_fetches(), 0);
    }

    #[tokio::test]
    async fn test_remote_resolution_is_cached() {
        let (service, registry, tokens) = service(
            remote_config(),
            MockRegistry::default().with_collection(REMOTE, &[&[("ADT_A01", "{{ msg }}")]]),
        );
        let request = TemplateRequest::new(REMOTE);

        let first = service
            .resolve(&request, &CancellationToken::new())
            .await
            .unwrap();
        let second = service
            .resolve(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.manifest_fetches(), 1);
        assert_eq!(registry.blob_fetches(), 1);
        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_override_is_served() {
        let (_dir, path) = package(&[("ADT_A01", "{{ custom }}")]);
        let config = ConvertDataConfig {
            custom_hl7_templates_file: Some(path),
            ..Default::default()
        };
        let (service, _, _) = service(config, MockRegistry::default());

        let templates = service
            .resolve(&TemplateRequest::new(DEFAULT_HL7), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(templates.template_names(), vec!["ADT_A01"]);
    }

    #[tokio::test]
    async fn test_override_survives_eviction() {
        let (_dir, path) = package(&[("ADT_A01", "{{ custom }}")]);
        let config = ConvertDataConfig {
            custom_hl7_templates_file: Some(path),
            ..Default::default()
        };
        let (service, _, _) = service(config, MockRegistry::default());
        service
            .cache
            .remove(&CacheKey::Collection(DEFAULT_HL7.to_string()));

        let templates = service
            .resolve(&TemplateRequest::new(DEFAULT_HL7), &CancellationToken::new())
            .await
            .unwrap();
        assert!(templates.get("DataType/XPN").is_none());
    }

    #[test]
    fn test_missing_override_fails_construction() {
        let config = ConvertDataConfig {
            custom_templates: vec![CustomTemplatesConfig {
                data_type: DataType::Hl7v2,
                file: PathBuf::from("/nonexistent/Hl7v2.tar.gz"),
            }],
            ..Default::default()
        };
        let result = TemplateResolutionService::new(
            config,
            Arc::new(MockRegistry::default()),
            Arc::new(CountingTokens::default()),
        );
        assert!(matches!(result, Err(TemplarError::OverrideSourceNotFound(_))));
    }

    #[test]
    fn test_override_without_adt_templates_fails_construction() {
        let (_dir, path) = package(&[("ORU_R01", "{{ msg }}"), ("Hl7v2/ADT_A01", "{{ msg }}")]);
        let config = ConvertDataConfig {
            custom_hl7_templates_file: Some(path),
            ..Default::default()
        };
        let result = TemplateResolutionService::new(
            config,
            Arc::new(MockRegistry::default()),
            Arc::new(CountingTokens::default()),
        );
        assert!(matches!(
            result,
            Err(TemplarError::OverrideValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_fetch_failure() {
        let (service, _, _) = service(
            remote_config(),
            MockRegistry::default()
                .with_collection(REMOTE, &[&[("ADT_A01", "a")]])
                .with_delay(Duration::from_secs(10)),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = service
            .resolve(&TemplateRequest::new(REMOTE), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::OperationCancelled(_)));
    }

    #[tokio::test]
    async fn test_error_classification() {
        let (service, _, _) = service(
            remote_config(),
            MockRegistry::default().with_collection(REMOTE, &[&[("ADT_A01", "{{ broken")]]),
        );
        let cancel = CancellationToken::new();

        let err = service
            .resolve(&TemplateRequest::new("myacr.azurecr.io/missing:v1"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::CollectionFetchFailed(_)));

        let err = service
            .resolve(&TemplateRequest::new("other.azurecr.io/hl7:v1"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::CollectionFetchFailed(_)));

        let err = service
            .resolve(&TemplateRequest::new("Not A Reference"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::CollectionFetchFailed(_)));

        let err = service
            .resolve(&TemplateRequest::new(REMOTE), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::CollectionParseFailed(_)));
    }

    #[tokio::test]
    async fn test_credential_failure() {
        let registry = Arc::new(
            MockRegistry::default().with_collection(REMOTE, &[&[("ADT_A01", "a")]]),
        );
        let tokens = Arc::new(CountingTokens {
            fail: true,
            ..Default::default()
        });
        let service =
            TemplateResolutionService::new(remote_config(), registry.clone(), tokens).unwrap();

        let err = service
            .resolve(&TemplateRequest::new(REMOTE), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::CollectionFetchFailed(m) if m.contains("no identity")));
        assert_eq!(registry.manifest_fetches(), 0);
    }

    #[tokio::test]
    async fn test_dispose_twice() {
        let (service, _, _) = service(ConvertDataConfig::default(), MockRegistry::default());
        service
            .resolve(&TemplateRequest::new(DEFAULT_HL7), &CancellationToken::new())
            .await
            .unwrap();

        assert!(service.dispose());
        assert!(!service.dispose());
        assert_eq!(service.cache_stats().entry_count, 0);

        let err = service
            .resolve(&TemplateRequest::new(DEFAULT_HL7), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TemplarError::UnexpectedInternalError(_)));
        drop(service);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolutions() {
        let (service, _, _) = service(
            remote_config(),
            MockRegistry::default().with_collection(REMOTE, &[&[("ADT_A01", "a")]]),
        );
        let service = Arc::new(service);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let reference = if i % 2 == 0 { REMOTE } else { DEFAULT_HL7 };
                    service
                        .resolve(&TemplateRequest::new(reference), &CancellationToken::new())
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(!handle.await.unwrap().unwrap().is_empty());
        }
    }
}
