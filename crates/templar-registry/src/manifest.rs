//! OCI image manifest

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use templar_core::{is_valid_digest, TemplateManagementError};

/// Media type accepted for template collection manifests
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker v2 manifests are accepted as well
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Content descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// OCI image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Parse and validate raw manifest bytes
    pub fn parse(reference: &str, bytes: &[u8]) -> Result<Self, TemplateManagementError> {
        let invalid = |reason: String| TemplateManagementError::InvalidManifest {
            reference: reference.to_string(),
            reason,
        };

        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;

        if manifest.schema_version != 2 {
            return Err(invalid(format!(
                "unsupported schema version {}",
                manifest.schema_version
            )));
        }
        if manifest.layers.is_empty() {
            return Err(invalid("manifest has no layers".to_string()));
        }
        if let Some(layer) = manifest.layers.iter().find(|l| !is_valid_digest(&l.digest)) {
            return Err(invalid(format!("invalid layer digest '{}'", layer.digest)));
        }
        if manifest
            .layers
            .iter()
            .try_fold(0u64, |total, l| total.checked_add(l.size))
            .is_none()
        {
            return Err(invalid("layer sizes overflow".to_string()));
        }

        Ok(manifest)
    }

    /// Summed declared size of all layers, saturating at `u64::MAX`
    pub fn total_layer_size(&self) -> u64 {
        self.layers
            .iter()
            .fold(0u64, |total, l| total.saturating_add(l.size))
    }
}

/// Check that content hashes to the given `sha256:` digest
pub fn verify_digest(digest: &str, content: &[u8]) -> bool {
    let actual = format!("sha256:{}", hex::encode(Sha256::digest(content)));
    actual == digest
}
