//! templar-resolver: Template collection resolution
//!
//! This crate turns collection references into template sets:
//! - Provider selection (default, registry or rejected)
//! - Cache-backed collection providers with the remote fetch pipeline
//! - Startup-time custom template overrides
//! - The resolution service consumed by data conversion

pub mod artifact;
pub mod factory;
pub mod overrides;
pub mod provider;
pub mod service;

#[cfg(test)]
mod testing;

pub use artifact::{Artifact, ArtifactCache, CacheKey};
pub use factory::{CollectionProviderFactory, CollectionSource};
pub use overrides::OverrideInitializer;
pub use provider::{CollectionProvider, Resolution, ResolutionSource};
pub use service::{TemplateRequest, TemplateResolutionService};
