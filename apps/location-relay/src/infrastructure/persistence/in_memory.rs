//! In-memory adapters for the storage and authorizer ports.
//!
//! Suitable for development and tests; a production deployment swaps
//! these for adapters backed by the account database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::application::ports::{
    AuthorizerError, GroupAuthorizerPort, GroupTarget, LocationStoreError, LocationStorePort,
    RecordReceipt,
};
use crate::domain::location::LocationUpdate;
use crate::domain::subscription::{GroupId, UserId};

// =============================================================================
// Location Store
// =============================================================================

/// One persisted location record.
#[derive(Debug, Clone)]
pub struct StoredLocation {
    /// Store-assigned record identifier.
    pub record_id: String,
    /// The persisted payload.
    pub update: LocationUpdate,
    /// Server time the record was written.
    pub stored_at: DateTime<Utc>,
}

/// In-memory implementation of `LocationStorePort`.
#[derive(Debug, Default)]
pub struct InMemoryLocationStore {
    records: RwLock<HashMap<UserId, Vec<StoredLocation>>>,
}

impl InMemoryLocationStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored for one user.
    #[must_use]
    pub fn record_count(&self, user_id: &str) -> usize {
        self.records.read().get(user_id).map_or(0, Vec::len)
    }

    /// Latest record stored for one user, if any.
    #[must_use]
    pub fn latest(&self, user_id: &str) -> Option<StoredLocation> {
        self.records
            .read()
            .get(user_id)
            .and_then(|records| records.last().cloned())
    }

    /// Remove all records.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl LocationStorePort for InMemoryLocationStore {
    async fn create_location_record(
        &self,
        user_id: &UserId,
        update: &LocationUpdate,
    ) -> Result<RecordReceipt, LocationStoreError> {
        let record_id = Uuid::new_v4().to_string();
        let stored_at = Utc::now();
        self.records
            .write()
            .entry(user_id.clone())
            .or_default()
            .push(StoredLocation {
                record_id: record_id.clone(),
                update: update.clone(),
                stored_at,
            });
        Ok(RecordReceipt {
            record_id,
            received_at: stored_at,
        })
    }
}

// =============================================================================
// Membership Directory
// =============================================================================

/// Lifecycle state of a group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    /// Fully joined member.
    Active,
    /// Invited but not yet accepted; reports still fan out so the
    /// inviter sees the invitee as soon as they accept.
    Pending,
}

/// One user-to-group membership edge.
#[derive(Debug, Clone)]
pub struct Membership {
    /// The group this membership grants fan-out to.
    pub group_id: GroupId,
    /// Group flush interval in whole seconds, if configured.
    pub frequency_secs: Option<u64>,
    /// Membership lifecycle state.
    pub state: MembershipState,
}

/// In-memory implementation of `GroupAuthorizerPort`.
///
/// Resolution preserves insertion order within each state and lists
/// active memberships before pending ones, so the first target is always
/// the user's primary group.
#[derive(Debug, Default)]
pub struct InMemoryMembershipDirectory {
    memberships: RwLock<HashMap<UserId, Vec<Membership>>>,
}

impl InMemoryMembershipDirectory {
    /// Create a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a membership edge (for setup).
    pub fn add_membership(&self, user_id: &str, membership: Membership) {
        self.memberships
            .write()
            .entry(user_id.to_string())
            .or_default()
            .push(membership);
    }

    /// Remove every membership for one user.
    pub fn remove_user(&self, user_id: &str) {
        self.memberships.write().remove(user_id);
    }
}

#[async_trait]
impl GroupAuthorizerPort for InMemoryMembershipDirectory {
    async fn resolve_target_groups<'a>(
        &self,
        user_id: &UserId,
        candidate_groups: Option<&'a [GroupId]>,
    ) -> Result<Vec<GroupTarget>, AuthorizerError> {
        let memberships = self.memberships.read();
        let Some(edges) = memberships.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut targets = Vec::with_capacity(edges.len());
        for state in [MembershipState::Active, MembershipState::Pending] {
            targets.extend(
                edges
                    .iter()
                    .filter(|m| m.state == state)
                    .filter(|m| candidate_groups.is_none_or(|c| c.contains(&m.group_id)))
                    .map(|m| GroupTarget::new(m.group_id.clone(), m.frequency_secs)),
            );
        }
        Ok(targets)
    }
}

// =============================================================================
// Tests
// =============================================================================
