//! Template collection references
//!
//! A reference looks like a container image name: `[registry/]repository[:tag|@digest]`.
//! The original string is kept verbatim and is what the cache is keyed by.

use crate::TemplateManagementError;
use std::fmt;

const DEFAULT_TAG: &str = "latest";
const DIGEST_PREFIX: &str = "sha256:";

/// Tag or digest part of a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceVersion {
    Tag(String),
    Digest(String),
}

impl ReferenceVersion {
    /// The string used in registry manifest URLs
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceVersion::Tag(t) => t,
            ReferenceVersion::Digest(d) => d,
        }
    }
}

/// Parsed template collection reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionReference {
    raw: String,
    registry: Option<String>,
    repository: String,
    version: ReferenceVersion,
}

impl CollectionReference {
    /// Parse a reference string
    pub fn parse(raw: &str) -> Result<Self, TemplateManagementError> {
        let invalid = |reason: &str| TemplateManagementError::InvalidReference {
            reference: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if trimmed != raw {
            return Err(invalid("reference contains surrounding whitespace"));
        }

        let (name, version) = if let Some((name, digest)) = raw.split_once('@') {
            if !is_valid_digest(digest) {
                return Err(invalid("digest must be sha256:<64 hex characters>"));
            }
            (name, ReferenceVersion::Digest(digest.to_string()))
        } else {
            // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
            let last_slash = raw.rfind('/').map_or(0, |i| i + 1);
            match raw[last_slash..].rfind(':') {
                Some(i) => {
                    let split = last_slash + i;
                    let tag = &raw[split + 1..];
                    if !is_valid_tag(tag) {
                        return Err(invalid("tag contains invalid characters"));
                    }
                    (&raw[..split], ReferenceVersion::Tag(tag.to_string()))
                }
                None => (raw, ReferenceVersion::Tag(DEFAULT_TAG.to_string())),
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_ascii_lowercase()), rest)
            }
            _ => (None, name),
        };

        if repository.is_empty() {
            return Err(invalid("repository is empty"));
        }
        if !is_valid_repository(repository) {
            return Err(invalid("repository must be lowercase [a-z0-9._/-]"));
        }

        Ok(Self {
            raw: raw.to_string(),
            registry,
            repository: repository.to_string(),
            version,
        })
    }

    /// The reference exactly as given
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Registry host, if the reference names one
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Repository path within the registry
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag or digest
    pub fn version(&self) -> &ReferenceVersion {
        &self.version
    }
}

impl fmt::Display for CollectionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether a string is a `sha256:<64 hex>` digest
pub fn is_valid_digest(digest: &str) -> bool {
    digest
        .strip_prefix(DIGEST_PREFIX)
        .map_or(false, |hex| {
            hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        })
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

fn is_valid_repository(repository: &str) -> bool {
    repository.split('/').all(|component| {
        !component.is_empty()
            && component.bytes().all(|b| {
                b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')
            })
    })
}
