//! Subscriber and Group Identity Types
//!
//! A group is an authorization scope: devices report into it, stream
//! clients subscribe to it. Identifiers are opaque strings issued by the
//! external account system; this process never parses them.

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifier Aliases
// =============================================================================

/// Opaque group identifier (authorization scope for fan-out).
pub type GroupId = String;

/// Opaque user identifier (owner of devices and memberships).
pub type UserId = String;

/// Opaque device identifier within a user's account.
pub type DeviceId = String;

/// Identity of a stream consumer, derived from its API key.
///
/// A given subscriber id holds at most one live subscription per group:
/// re-subscribing supersedes the previous delivery path.
pub type SubscriberId = String;

// =============================================================================
// Stream Identity
// =============================================================================

/// Resolved identity of an authenticated stream connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamIdentity {
    /// Subscriber identity derived from the API key.
    pub subscriber_id: SubscriberId,
    /// The single group this credential is scoped to.
    pub group_id: GroupId,
}

impl StreamIdentity {
    /// Create a new stream identity.
    #[must_use]
    pub const fn new(subscriber_id: SubscriberId, group_id: GroupId) -> Self {
        Self {
            subscriber_id,
            group_id,
        }
    }
}
