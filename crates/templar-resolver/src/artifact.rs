//! Cached artifacts

use std::sync::Arc;
use templar_core::{TemplateLayer, TemplateSet};
use templar_registry::Manifest;
use templar_store::SizeBoundedCache;

/// Cache key, namespaced by artifact kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Parsed collection, keyed by the reference string verbatim
    Collection(String),
    /// Manifest, keyed by the reference string verbatim
    Manifest(String),
    /// Parsed layer, keyed by content digest
    Layer(String),
    /// Registry credential, keyed by registry host
    Credential(String),
}

/// Any cacheable unit
#[derive(Debug, Clone)]
pub enum Artifact {
    Credential(String),
    Manifest(Arc<Manifest>),
    Layer(Arc<TemplateLayer>),
    Templates(Arc<TemplateSet>),
}

/// The cache shared by the factory, providers and the service
pub type ArtifactCache = SizeBoundedCache<CacheKey, Artifact>;
