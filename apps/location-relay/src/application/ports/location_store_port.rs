//! Location Store Port (Driven Port)
//!
//! Interface for durably recording location reports. Persistence is
//! unconditional: a report is stored even when it ends up fanning out to
//! no group, so history survives transient membership gaps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::location::LocationUpdate;
use crate::domain::subscription::UserId;

/// Location persistence error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocationStoreError {
    /// Backing store unreachable.
    #[error("Location store connection error: {message}")]
    ConnectionError {
        /// Underlying failure description.
        message: String,
    },

    /// Write rejected by the backing store.
    #[error("Location record write failed: {message}")]
    WriteFailed {
        /// Underlying failure description.
        message: String,
    },
}

/// Receipt for one persisted location record.
///
/// The identifier and receipt time are minted by the store and echoed
/// back to the reporting device in the acceptance response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReceipt {
    /// Store-assigned record identifier.
    pub record_id: String,
    /// Server time the record was written.
    pub received_at: DateTime<Utc>,
}

/// Port for persisting location reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationStorePort: Send + Sync {
    /// Durably record one location report for `user_id`.
    async fn create_location_record(
        &self,
        user_id: &UserId,
        update: &LocationUpdate,
    ) -> Result<RecordReceipt, LocationStoreError>;
}
