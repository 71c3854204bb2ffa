//! Group Authorizer Port (Driven Port)
//!
//! Interface for resolving which groups a user's location reports fan out
//! to. Group membership lives in the external account system; this
//! process only consumes the resolved list.

use async_trait::async_trait;

use crate::domain::subscription::{GroupId, UserId};

/// Group resolution error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorizerError {
    /// Membership directory unreachable.
    #[error("Group resolution connection error: {message}")]
    ConnectionError {
        /// Underlying failure description.
        message: String,
    },
}

/// A group a report fans out to, with its configured flush interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTarget {
    /// The target group.
    pub group_id: GroupId,
    /// Group notification frequency in whole seconds, if configured.
    pub frequency_secs: Option<u64>,
}

impl GroupTarget {
    /// Create a group target.
    #[must_use]
    pub const fn new(group_id: GroupId, frequency_secs: Option<u64>) -> Self {
        Self {
            group_id,
            frequency_secs,
        }
    }
}

/// Port for resolving a user's fan-out target groups.
///
/// The returned order is meaningful: the first target is the user's
/// primary group (active memberships before pending invitations).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupAuthorizerPort: Send + Sync {
    /// Resolve every group `user_id`'s reports are authorized to reach.
    ///
    /// When `candidate_groups` is given, the result is its intersection
    /// with the user's memberships; a candidate the user is not a member
    /// of is silently dropped, never granted. An empty result means the
    /// report fans out to no one; the caller treats that as an
    /// authorization rejection.
    async fn resolve_target_groups<'a>(
        &self,
        user_id: &UserId,
        candidate_groups: Option<&'a [GroupId]>,
    ) -> Result<Vec<GroupTarget>, AuthorizerError>;
}
