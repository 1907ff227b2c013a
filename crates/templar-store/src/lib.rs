//! templar-store: Template storage
//!
//! This crate provides template storage functionality:
//! - Size-bounded in-memory cache with LRU eviction
//! - Template package (tar.gz) reading and writing
//! - Built-in default template collections

pub mod archive;
pub mod builtin;
pub mod cache;

pub use archive::{pack_templates, read_package};
pub use builtin::builtin_templates;
pub use cache::{CacheStats, SizeBoundedCache};
