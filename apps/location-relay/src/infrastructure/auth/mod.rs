//! In-Memory Credential Tables
//!
//! Static credential adapters for the two authentication ports, loaded
//! from environment variables at startup. Production deployments swap
//! these for an adapter backed by the account system; the ports keep the
//! rest of the service indifferent to which is wired in.
//!
//! # Environment Format
//!
//! - `RELAY_BEARER_TOKENS`: comma-separated `token:userId` pairs for the
//!   ingestion endpoint.
//! - `RELAY_API_KEYS`: comma-separated `key:subscriberId:groupId` triples
//!   for the stream endpoint.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::application::ports::{AuthError, StreamKeyAuthenticatorPort, TokenAuthenticatorPort};
use crate::domain::subscription::{StreamIdentity, UserId};
use crate::infrastructure::config::ConfigError;

// =============================================================================
// Bearer Token Table
// =============================================================================

/// Static bearer-token table for the ingestion endpoint.
#[derive(Clone, Default)]
pub struct StaticBearerTokens {
    tokens: HashMap<String, UserId>,
}

impl StaticBearerTokens {
    /// Build a table from `(token, user)` pairs.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self {
            tokens: pairs.into_iter().collect(),
        }
    }

    /// Load the table from `RELAY_BEARER_TOKENS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is missing, empty, or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("RELAY_BEARER_TOKENS")
            .map_err(|_| ConfigError::MissingEnvVar("RELAY_BEARER_TOKENS".to_string()))?;
        let mut tokens = HashMap::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let (token, user) = entry
                .trim()
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidValue("RELAY_BEARER_TOKENS".to_string()))?;
            if token.is_empty() || user.is_empty() {
                return Err(ConfigError::InvalidValue("RELAY_BEARER_TOKENS".to_string()));
            }
            tokens.insert(token.to_string(), user.to_string());
        }
        if tokens.is_empty() {
            return Err(ConfigError::InvalidValue("RELAY_BEARER_TOKENS".to_string()));
        }
        Ok(Self { tokens })
    }

    /// Number of configured tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenAuthenticatorPort for StaticBearerTokens {
    async fn authenticate_bearer(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)
    }
}

impl std::fmt::Debug for StaticBearerTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticBearerTokens")
            .field("tokens", &format!("[{} REDACTED]", self.tokens.len()))
            .finish()
    }
}

// =============================================================================
// Stream Key Table
// =============================================================================

/// Static API-key table for the stream endpoint.
///
/// Each key is scoped to exactly one group; the subscriber id doubles as
/// the supersede key for re-subscription.
#[derive(Clone, Default)]
pub struct StaticStreamKeys {
    keys: HashMap<String, StreamIdentity>,
}

impl StaticStreamKeys {
    /// Build a table from `(key, identity)` pairs.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, StreamIdentity)>) -> Self {
        Self {
            keys: pairs.into_iter().collect(),
        }
    }

    /// Load the table from `RELAY_API_KEYS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is missing, empty, or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("RELAY_API_KEYS")
            .map_err(|_| ConfigError::MissingEnvVar("RELAY_API_KEYS".to_string()))?;
        let mut keys = HashMap::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let mut parts = entry.trim().splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(subscriber), Some(group))
                    if !key.is_empty() && !subscriber.is_empty() && !group.is_empty() =>
                {
                    keys.insert(
                        key.to_string(),
                        StreamIdentity::new(subscriber.to_string(), group.to_string()),
                    );
                }
                _ => return Err(ConfigError::InvalidValue("RELAY_API_KEYS".to_string())),
            }
        }
        if keys.is_empty() {
            return Err(ConfigError::InvalidValue("RELAY_API_KEYS".to_string()));
        }
        Ok(Self { keys })
    }

    /// Number of configured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl StreamKeyAuthenticatorPort for StaticStreamKeys {
    async fn authenticate_stream_key(&self, key: &str) -> Result<StreamIdentity, AuthError> {
        self.keys
            .get(key)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)
    }
}

impl std::fmt::Debug for StaticStreamKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticStreamKeys")
            .field("keys", &format!("[{} REDACTED]", self.keys.len()))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
