//! templar-core: Core types for template collection resolution
//!
//! This crate provides the fundamental types shared by the templar crates:
//! - Configuration types
//! - Error taxonomy (caller-facing and provider-level)
//! - Collection references and data types
//! - Parsed templates, layers and template sets
//! - Cancellation

pub mod cancel;
pub mod config;
pub mod error;
pub mod reference;
pub mod template;

pub use cancel::*;
pub use config::*;
pub use error::*;
pub use reference::*;
pub use template::*;
