//! templar-registry: Registry access
//!
//! This crate provides access to remote template collections:
//! - OCI image manifest model and validation
//! - Registry client trait and an OCI distribution HTTP implementation
//! - Credential acquisition

pub mod client;
pub mod manifest;
pub mod token;

pub use client::{OciRegistryClient, RegistryClient, RegistryError};
pub use manifest::{verify_digest, Descriptor, Manifest};
pub use token::{StaticTokenProvider, TokenError, TokenProvider};
