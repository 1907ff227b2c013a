//! Custom template overrides
//!
//! Operators may replace a built-in default collection with a local tar.gz
//! package. Root templates must sit at the top of the package, not inside a
//! folder. Any problem aborts startup.

use templar_core::{CustomTemplatesConfig, TemplarError, TemplarResult, TemplateSet};
use tracing::info;

use crate::factory::CollectionProviderFactory;

/// Applies configured overrides once, while the service is being built
pub struct OverrideInitializer<'a> {
    factory: &'a CollectionProviderFactory,
}

impl<'a> OverrideInitializer<'a> {
    pub fn new(factory: &'a CollectionProviderFactory) -> Self {
        Self { factory }
    }

    /// Load, validate and install every override
    pub fn run(&self, overrides: &[CustomTemplatesConfig]) -> TemplarResult<()> {
        if overrides.is_empty() {
            info!("No custom template packages configured");
            return Ok(());
        }
        for custom in overrides {
            self.apply(custom)?;
        }
        Ok(())
    }

    fn apply(&self, custom: &CustomTemplatesConfig) -> TemplarResult<()> {
        let path = &custom.file;
        let data_type = custom.data_type;

        if !path.is_file() {
            return Err(TemplarError::OverrideSourceNotFound(path.clone()));
        }
        info!(
            data_type = %data_type,
            path = %path.display(),
            "Loading custom templates"
        );

        let bytes = std::fs::read(path).map_err(|e| {
            TemplarError::ConfigurationInvalid(format!(
                "failed to read custom template package {}: {}",
                path.display(),
                e
            ))
        })?;
        let layer = templar_store::read_package(&bytes, "").map_err(|e| {
            TemplarError::ConfigurationInvalid(format!(
                "failed to load custom template package {}: {}",
                path.display(),
                e
            ))
        })?;
        let templates = TemplateSet::from_layers([layer]);

        if !data_type.satisfies_minimum_content(&templates) {
            return Err(TemplarError::OverrideValidationFailed(format!(
                "root template {}* not found in root of package: {}",
                data_type.required_root_prefix(),
                path.display()
            )));
        }

        self.factory.init_default_templates(data_type, templates);
        info!(
            data_type = %data_type,
            reference = data_type.default_reference(),
            path = %path.display(),
            "Using custom template collection"
        );
        Ok(())
    }
}
