//! Authentication Ports (Driven Ports)
//!
//! Two independent credential surfaces: device ingestion authenticates
//! with a bearer token resolving to a user, stream consumers authenticate
//! with an API key resolving to a subscriber identity scoped to one
//! group.

use async_trait::async_trait;

use crate::domain::subscription::{StreamIdentity, UserId};

/// Credential verification error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Credential missing, malformed, or unknown.
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Port for authenticating device bearer tokens on the ingestion path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenAuthenticatorPort: Send + Sync {
    /// Resolve a bearer token to the reporting user.
    async fn authenticate_bearer(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Port for authenticating stream API keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamKeyAuthenticatorPort: Send + Sync {
    /// Resolve an API key to a subscriber identity and its group scope.
    async fn authenticate_stream_key(&self, key: &str) -> Result<StreamIdentity, AuthError>;
}
