//! Registry credential acquisition

use async_trait::async_trait;
use thiserror::Error;

/// Credential acquisition failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("token acquisition failed: {0}")]
pub struct TokenError(pub String);

/// Source of bearer tokens for registry access
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a token for `registry`, scoped to the target `resource` URI
    async fn access_token(&self, resource: &str, registry: &str) -> Result<String, TokenError>;
}

/// Hands out one fixed token; an empty token means anonymous access
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Anonymous access
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, _resource: &str, _registry: &str) -> Result<String, TokenError> {
        Ok(self.token.clone())
    }
}
