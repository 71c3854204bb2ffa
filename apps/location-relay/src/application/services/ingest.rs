//! Location Ingestion Service
//!
//! Coordinates the ingestion pipeline: validate the report, persist it,
//! resolve the user's fan-out groups, and enqueue one copy per group on
//! the batching scheduler. Persistence happens before group resolution so
//! history is recorded even for users who currently share with no one.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ports::{
    AuthorizerError, GroupAuthorizerPort, LocationStoreError, LocationStorePort,
};
use crate::domain::location::{LocationUpdate, ValidationError};
use crate::domain::subscription::{GroupId, UserId};
use crate::infrastructure::metrics::{self, RejectReason};
use crate::infrastructure::scheduler::{SchedulerError, SharedScheduler};

// =============================================================================
// Configuration
// =============================================================================

/// Frequency clamping applied to group-configured flush intervals.
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    /// Flush interval used when a group has none configured (seconds).
    pub default_frequency_secs: u64,
    /// Lower clamp for configured intervals (seconds).
    pub min_frequency_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_frequency_secs: 30,
            min_frequency_secs: 1,
        }
    }
}

/// Per-request ingestion options supplied by the reporting device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Restrict fan-out to these groups, intersected with the user's
    /// memberships. `None` fans out to every authorized group.
    pub group_ids: Option<Vec<GroupId>>,
    /// Flush frequency override in whole seconds; takes precedence over
    /// group-configured intervals but is still clamped to the minimum.
    pub frequency_secs: Option<u64>,
}

// =============================================================================
// Errors
// =============================================================================

/// Why a location report was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Payload failed range validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The user's reports currently fan out to no group.
    #[error("user has no authorized target groups")]
    NoTargetGroups,

    /// Persisting the report failed.
    #[error(transparent)]
    Storage(#[from] LocationStoreError),

    /// Resolving target groups failed.
    #[error(transparent)]
    Authorizer(#[from] AuthorizerError),

    /// The scheduler refused the enqueue.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

// =============================================================================
// Ingestion Service
// =============================================================================

/// Outcome of an accepted report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestAccepted {
    /// Store-assigned identifier of the persisted record.
    pub record_id: String,
    /// Server time the record was written.
    pub received_at: DateTime<Utc>,
    /// Groups the report was queued for, primary group first.
    pub target_groups: Vec<GroupId>,
}

/// Validates, persists, and queues incoming location reports.
pub struct IngestService {
    store: Arc<dyn LocationStorePort>,
    authorizer: Arc<dyn GroupAuthorizerPort>,
    scheduler: SharedScheduler,
    config: IngestConfig,
}

impl IngestService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn LocationStorePort>,
        authorizer: Arc<dyn GroupAuthorizerPort>,
        scheduler: SharedScheduler,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            authorizer,
            scheduler,
            config,
        }
    }

    /// Run the full ingestion pipeline for one authenticated report.
    ///
    /// # Errors
    ///
    /// Returns the stage that rejected the report; persistence is attempted
    /// before group resolution, so a [`IngestError::NoTargetGroups`]
    /// rejection still leaves the record stored.
    pub async fn ingest(
        &self,
        user_id: &UserId,
        update: LocationUpdate,
        options: IngestOptions,
    ) -> Result<IngestAccepted, IngestError> {
        if let Err(err) = update.validate() {
            metrics::record_update_rejected(RejectReason::Invalid);
            tracing::debug!(user = %user_id, error = %err, "Rejected invalid location report");
            return Err(err.into());
        }

        let receipt = match self.store.create_location_record(user_id, &update).await {
            Ok(receipt) => receipt,
            Err(err) => {
                metrics::record_update_rejected(RejectReason::Storage);
                tracing::error!(user = %user_id, error = %err, "Failed to persist location report");
                return Err(err.into());
            }
        };

        let targets = match self
            .authorizer
            .resolve_target_groups(user_id, options.group_ids.as_deref())
            .await
        {
            Ok(targets) => targets,
            Err(err) => {
                metrics::record_update_rejected(RejectReason::Storage);
                tracing::error!(user = %user_id, error = %err, "Failed to resolve target groups");
                return Err(err.into());
            }
        };
        if targets.is_empty() {
            metrics::record_update_rejected(RejectReason::Unauthorized);
            tracing::debug!(user = %user_id, "Location report persisted but fans out to no group");
            return Err(IngestError::NoTargetGroups);
        }

        let mut target_groups = Vec::with_capacity(targets.len());
        for target in targets {
            let frequency = options
                .frequency_secs
                .or(target.frequency_secs)
                .unwrap_or(self.config.default_frequency_secs)
                .max(self.config.min_frequency_secs);
            self.scheduler.queue_update(
                target.group_id.clone(),
                update.clone(),
                user_id.clone(),
                update.device_id.clone(),
                frequency,
            )?;
            target_groups.push(target.group_id);
        }

        metrics::record_update_received();
        tracing::debug!(
            user = %user_id,
            device = %update.device_id,
            groups = target_groups.len(),
            "Location report queued"
        );
        Ok(IngestAccepted {
            record_id: receipt.record_id,
            received_at: receipt.received_at,
            target_groups,
        })
    }
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
