//! Configuration types for templar

use crate::template::DataType;
use crate::{TemplarError, TemplarResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Template conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertDataConfig {
    /// Whether template resolution is enabled
    pub enabled: bool,
    /// Registry servers that collections may be pulled from
    pub container_registry_servers: Vec<String>,
    /// Resource URI used when acquiring registry credentials
    pub acr_target_resource_uri: String,
    /// Cache size limit in bytes (credentials, manifests, layers, collections)
    pub cache_size_limit: u64,
    /// Per-operation timeout in seconds
    pub operation_timeout_secs: u64,
    /// Emit one telemetry record per resolution
    pub enable_telemetry_logger: bool,
    /// Maximum summed layer size of one remote collection in bytes
    pub template_collection_size_limit: u64,
    /// Custom packages replacing built-in default collections
    pub custom_templates: Vec<CustomTemplatesConfig>,
    /// Shorthand for a custom HL7v2 package
    pub custom_hl7_templates_file: Option<PathBuf>,
}

impl Default for ConvertDataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            container_registry_servers: Vec::new(),
            acr_target_resource_uri: "https://management.azure.com/".to_string(),
            cache_size_limit: 100_000_000,
            operation_timeout_secs: 30,
            enable_telemetry_logger: false,
            template_collection_size_limit: 10 * 1024 * 1024,
            custom_templates: Vec::new(),
            custom_hl7_templates_file: None,
        }
    }
}

impl ConvertDataConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> TemplarResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TemplarError::ConfigurationInvalid(format!("Failed to read config file: {}", e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            TemplarError::ConfigurationInvalid(format!("Failed to parse config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the resolution service cannot run with
    pub fn validate(&self) -> TemplarResult<()> {
        if self.cache_size_limit == 0 {
            return Err(TemplarError::ConfigurationInvalid(
                "cache_size_limit must be greater than zero".to_string(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(TemplarError::ConfigurationInvalid(
                "operation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self
            .container_registry_servers
            .iter()
            .any(|s| s.trim().is_empty())
        {
            return Err(TemplarError::ConfigurationInvalid(
                "container_registry_servers contains a blank entry".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-operation timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// All configured overrides, with the HL7v2 shorthand folded in
    pub fn overrides(&self) -> Vec<CustomTemplatesConfig> {
        let mut overrides = self.custom_templates.clone();
        if let Some(file) = &self.custom_hl7_templates_file {
            if !file.to_string_lossy().trim().is_empty()
                && !overrides.iter().any(|o| o.data_type == DataType::Hl7v2)
            {
                overrides.push(CustomTemplatesConfig {
                    data_type: DataType::Hl7v2,
                    file: file.clone(),
                });
            }
        }
        overrides
    }

}

/// A custom package replacing the built-in collection for one data type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTemplatesConfig {
    /// Data type whose default collection is replaced
    pub data_type: DataType,
    /// Path to the tar.gz package
    pub file: PathBuf,
}
