//! Error types for templar
//!
//! Two layers live here. [`TemplarError`] is what callers of the resolution
//! service see. [`ResolveError`] is what a collection provider returns: either
//! an expected [`TemplateManagementError`] or an unexpected failure whose detail
//! must stay on this side of the service boundary.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Generic message surfaced for unexpected failures
pub const UNEXPECTED_FAILURE_MESSAGE: &str = "failed to get template collection";

/// Caller-facing error type for templar
#[derive(Error, Debug)]
pub enum TemplarError {
    /// Malformed configuration detected at construction
    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),

    /// Configured override package does not exist
    #[error("Configuration error: custom template package not found: {}", .0.display())]
    OverrideSourceNotFound(PathBuf),

    /// Override package loaded but failed the minimum-content rule
    #[error("Custom template validation failed: {0}")]
    OverrideValidationFailed(String),

    /// Registry or network failure while fetching a collection
    #[error("Failed to fetch template collection: {0}")]
    CollectionFetchFailed(String),

    /// Fetched content could not be parsed into templates
    #[error("Failed to parse template collection: {0}")]
    CollectionParseFailed(String),

    /// Caller cancellation or operation timeout
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Anything not classified above
    #[error("Internal error: {0}")]
    UnexpectedInternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplarError {
    /// Whether this error must prevent the service from becoming ready
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            TemplarError::ConfigurationInvalid(_)
                | TemplarError::OverrideSourceNotFound(_)
                | TemplarError::OverrideValidationFailed(_)
        )
    }
}

/// Result type for templar operations
pub type TemplarResult<T> = Result<T, TemplarError>;

/// Registry failure classification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryFailure {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Expected failures while managing template collections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateManagementError {
    #[error("invalid template collection reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("template collection reference '{reference}' rejected: {reason}")]
    ReferenceRejected { reference: String, reason: String },

    #[error("failed to acquire registry credential for '{registry}': {reason}")]
    CredentialFailed { registry: String, reason: String },

    #[error("registry request for '{reference}' failed: {failure}")]
    Registry {
        reference: String,
        failure: RegistryFailure,
    },

    #[error("invalid manifest for '{reference}': {reason}")]
    InvalidManifest { reference: String, reason: String },

    #[error("layer '{digest}' does not match its digest")]
    DigestMismatch { digest: String },

    #[error("layer '{digest}' is {actual} bytes, manifest declares {declared}")]
    LayerSizeMismatch {
        digest: String,
        declared: u64,
        actual: u64,
    },

    #[error("template collection '{reference}' is {size} bytes, limit is {limit}")]
    CollectionTooLarge {
        reference: String,
        size: u64,
        limit: u64,
    },

    #[error("failed to parse templates: {0}")]
    ParseFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Provider-level failure: expected vs. unexpected
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Expected(#[from] TemplateManagementError),

    #[error("unexpected failure: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl ResolveError {
    /// Whether this failure came from the expected tier
    pub fn is_expected(&self) -> bool {
        matches!(self, ResolveError::Expected(_))
    }
}

impl From<ResolveError> for TemplarError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Expected(TemplateManagementError::ParseFailed(msg)) => {
                TemplarError::CollectionParseFailed(msg)
            }
            ResolveError::Expected(e @ TemplateManagementError::Cancelled)
            | ResolveError::Expected(e @ TemplateManagementError::TimedOut(_)) => {
                TemplarError::OperationCancelled(e.to_string())
            }
            ResolveError::Expected(e) => TemplarError::CollectionFetchFailed(e.to_string()),
            ResolveError::Unexpected(_) => {
                TemplarError::UnexpectedInternalError(UNEXPECTED_FAILURE_MESSAGE.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TemplarError::ConfigurationInvalid("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TemplarError = io_err.into();
        assert!(matches!(err, TemplarError::Io(_)));
    }

    #[test]
    fn test_startup_fatal_classification() {
        assert!(TemplarError::OverrideSourceNotFound(PathBuf::from("/x")).is_startup_fatal());
        assert!(TemplarError::OverrideValidationFailed("x".into()).is_startup_fatal());
        assert!(!TemplarError::CollectionFetchFailed("x".into()).is_startup_fatal());
    }

    #[test]
    fn test_parse_failure_maps_to_parse_error() {
        let err: TemplarError =
            ResolveError::from(TemplateManagementError::ParseFailed("bad".into())).into();
        assert!(matches!(err, TemplarError::CollectionParseFailed(m) if m == "bad"));
    }

    #[test]
    fn test_layer_size_mismatch_is_fetch_failure() {
        let err: TemplarError = ResolveError::from(TemplateManagementError::LayerSizeMismatch {
            digest: "sha256:abc".into(),
            declared: 1,
            actual: 101,
        })
        .into();
        assert!(matches!(err, TemplarError::CollectionFetchFailed(m) if m.contains("101")));
    }

    #[test]
    fn test_timeout_maps_to_cancelled() {
        let err: TemplarError =
            ResolveError::from(TemplateManagementError::TimedOut(Duration::from_secs(1))).into();
        assert!(matches!(err, TemplarError::OperationCancelled(_)));

        let err: TemplarError = ResolveError::from(TemplateManagementError::Cancelled).into();
        assert!(matches!(err, TemplarError::OperationCancelled(_)));
    }

    #[test]
    fn test_registry_failure_maps_to_fetch_error() {
        let err: TemplarError = ResolveError::from(TemplateManagementError::Registry {
            reference: "myacr.azurecr.io/hl7:v1".into(),
            failure: RegistryFailure::NotFound,
        })
        .into();
        match err {
            TemplarError::CollectionFetchFailed(msg) => assert!(msg.contains("not found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_failure_hides_detail() {
        let err: TemplarError =
            ResolveError::from(anyhow::anyhow!("secret stack detail")).into();
        let msg = err.to_string();
        assert!(!msg.contains("secret"));
        assert!(msg.contains(UNEXPECTED_FAILURE_MESSAGE));
    }
}
