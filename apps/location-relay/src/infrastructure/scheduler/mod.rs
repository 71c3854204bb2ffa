//! Batching Scheduler
//!
//! Decouples how often a device reports from how often a group is
//! notified. Updates enqueue at arbitrary rates; each group is flushed to
//! the event bus at most once per its configured frequency, and a newer
//! report for the same `(user, device)` replaces the older pending one so
//! the queue never grows unbounded and subscribers only ever see the
//! freshest position.
//!
//! # Buckets
//!
//! Groups sharing a flush interval share one recurring timer (a
//! "frequency bucket"). A bucket is created the first time any group uses
//! a previously-unseen interval and lives for the process lifetime; per
//! group, a flush only fires once at least its frequency has elapsed
//! since its previous flush. The very first enqueue for a brand-new
//! interval triggers one immediate flush pass so the first update is not
//! held for a full interval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
// tokio's Instant (not std's) so flush gating follows the runtime clock,
// including tests running under tokio::time::pause.
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::location::LocationUpdate;
use crate::domain::subscription::{DeviceId, GroupId, UserId};
use crate::infrastructure::bus::SharedEventBus;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Scheduler precondition violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Flush frequency must be a positive number of whole seconds; the
    /// ingestion path clamps before calling.
    #[error("flush frequency must be >= 1 second, got {0}")]
    InvalidFrequency(u64),
    /// The scheduler has been shut down.
    #[error("scheduler is shut down")]
    ShutDown,
}

// =============================================================================
// Internal State
// =============================================================================

/// A pending, not-yet-flushed location update.
#[derive(Debug, Clone)]
struct QueuedUpdate {
    payload: LocationUpdate,
    user_id: UserId,
    device_id: DeviceId,
    queued_at: Instant,
}

/// Per-group queue and flush bookkeeping.
#[derive(Debug)]
struct GroupQueue {
    frequency: Duration,
    /// `None` means never flushed, which always qualifies for a flush.
    last_flush: Option<Instant>,
    pending: Vec<QueuedUpdate>,
}

/// Groups sharing one recurring timer interval.
#[derive(Debug, Default)]
struct Bucket {
    groups: HashSet<GroupId>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    groups: HashMap<GroupId, GroupQueue>,
    buckets: HashMap<u64, Bucket>,
    shut_down: bool,
}

impl SchedulerState {
    fn pending_total(&self) -> usize {
        self.groups.values().map(|g| g.pending.len()).sum()
    }
}

// =============================================================================
// Batching Scheduler
// =============================================================================

/// Shared scheduler reference.
pub type SharedScheduler = Arc<BatchingScheduler>;

/// Per-group coalescing queue with frequency-bucketed flush timers.
pub struct BatchingScheduler {
    bus: SharedEventBus,
    state: Mutex<SchedulerState>,
    cancel: CancellationToken,
}

impl BatchingScheduler {
    /// Create a scheduler publishing flushed updates to `bus`.
    ///
    /// Bucket timer tasks are children of `cancel`; cancelling it stops
    /// them all.
    #[must_use]
    pub fn new(bus: SharedEventBus, cancel: CancellationToken) -> Self {
        Self {
            bus,
            state: Mutex::new(SchedulerState::default()),
            cancel,
        }
    }

    /// Enqueue a location update for `group_id`, coalescing with any
    /// pending update for the same `(user, device)` pair.
    ///
    /// `frequency_secs` is the group's flush interval; switching it
    /// re-assigns the group to the bucket for the new interval
    /// (last-write-wins). The first use of a previously-unseen interval
    /// starts its timer and triggers one immediate flush pass.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidFrequency`] for a zero frequency
    /// and [`SchedulerError::ShutDown`] after [`Self::shutdown`].
    pub fn queue_update(
        self: &Arc<Self>,
        group_id: GroupId,
        payload: LocationUpdate,
        user_id: UserId,
        device_id: DeviceId,
        frequency_secs: u64,
    ) -> Result<(), SchedulerError> {
        if frequency_secs == 0 {
            return Err(SchedulerError::InvalidFrequency(frequency_secs));
        }

        let frequency = Duration::from_secs(frequency_secs);
        let new_bucket = {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(SchedulerError::ShutDown);
            }

            // Re-assign the group if its frequency changed.
            let previous_secs = state.groups.get(&group_id).map(|g| g.frequency.as_secs());
            if let Some(prev) = previous_secs
                && prev != frequency_secs
                && let Some(bucket) = state.buckets.get_mut(&prev)
            {
                bucket.groups.remove(&group_id);
            }

            let queue = state
                .groups
                .entry(group_id.clone())
                .or_insert_with(|| GroupQueue {
                    frequency,
                    last_flush: None,
                    pending: Vec::new(),
                });
            queue.frequency = frequency;

            // Coalesce: at most one pending update per (user, device).
            let before = queue.pending.len();
            queue
                .pending
                .retain(|q| !(q.user_id == user_id && q.device_id == device_id));
            if queue.pending.len() < before {
                metrics::record_update_coalesced();
            }
            queue.pending.push(QueuedUpdate {
                payload,
                user_id,
                device_id,
                queued_at: Instant::now(),
            });

            let new_bucket = !state.buckets.contains_key(&frequency_secs);
            state
                .buckets
                .entry(frequency_secs)
                .or_default()
                .groups
                .insert(group_id);

            metrics::set_pending_updates(state.pending_total() as f64);
            new_bucket
        };

        if new_bucket {
            self.spawn_bucket_timer(frequency_secs);
            // Bootstrap: the first update for a new interval flushes
            // immediately instead of waiting out the whole interval.
            self.flush_bucket(frequency_secs);
        }

        Ok(())
    }

    /// Number of pending updates for one group.
    #[must_use]
    pub fn pending_count(&self, group_id: &str) -> usize {
        self.state
            .lock()
            .groups
            .get(group_id)
            .map_or(0, |g| g.pending.len())
    }

    /// Total pending updates across all groups.
    #[must_use]
    pub fn pending_total(&self) -> usize {
        self.state.lock().pending_total()
    }

    /// Stop all bucket timers and discard pending state.
    ///
    /// Process teardown only; `queue_update` fails afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        state.shut_down = true;
        state.groups.clear();
        state.buckets.clear();
        metrics::set_pending_updates(0.0);
        tracing::info!("Batching scheduler shut down");
    }

    /// Spawn the recurring timer task for one frequency bucket.
    ///
    /// The first scheduled tick is one full interval out; the bootstrap
    /// flush covers time zero.
    fn spawn_bucket_timer(self: &Arc<Self>, frequency_secs: u64) {
        let scheduler = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = Duration::from_secs(frequency_secs);

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::debug!(frequency_secs, "Flush timer started");

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!(frequency_secs, "Flush timer stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        scheduler.flush_bucket(frequency_secs);
                    }
                }
            }
        });
    }

    /// Run one flush pass over every group assigned to the bucket.
    ///
    /// Groups whose frequency has not yet elapsed since their previous
    /// flush are skipped until a later tick. Publishing happens after the
    /// state lock is released.
    fn flush_bucket(&self, frequency_secs: u64) {
        let batches: Vec<(GroupId, Vec<LocationUpdate>)> = {
            let mut state = self.state.lock();
            let Some(bucket) = state.buckets.get(&frequency_secs) else {
                return;
            };
            let group_ids: Vec<GroupId> = bucket.groups.iter().cloned().collect();

            let now = Instant::now();
            let mut batches = Vec::new();
            for group_id in group_ids {
                let Some(queue) = state.groups.get_mut(&group_id) else {
                    continue;
                };
                if queue.pending.is_empty() {
                    continue;
                }
                let due = queue
                    .last_flush
                    .is_none_or(|last| now.duration_since(last) >= queue.frequency);
                if !due {
                    continue;
                }

                let drained: Vec<QueuedUpdate> = std::mem::take(&mut queue.pending);
                queue.last_flush = Some(now);

                // Defensive dedupe: queue_update already coalesces, but a
                // flush may race an enqueue, so keep only the most
                // recently queued entry per (user, device).
                let mut latest: HashMap<(UserId, DeviceId), QueuedUpdate> = HashMap::new();
                for update in drained {
                    let key = (update.user_id.clone(), update.device_id.clone());
                    match latest.get(&key) {
                        Some(existing) if existing.queued_at > update.queued_at => {}
                        _ => {
                            latest.insert(key, update);
                        }
                    }
                }

                let payloads: Vec<LocationUpdate> =
                    latest.into_values().map(|q| q.payload).collect();
                batches.push((group_id, payloads));
            }

            metrics::set_pending_updates(state.pending_total() as f64);
            batches
        };

        for (group_id, payloads) in batches {
            let batch_size = payloads.len();
            let mut delivered = 0;
            for payload in payloads {
                delivered += self.bus.publish(&group_id, payload);
            }
            metrics::record_flush(batch_size);
            tracing::debug!(
                group = %group_id,
                batch_size,
                delivered,
                "Flushed pending updates"
            );
        }
    }
}

impl std::fmt::Debug for BatchingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingScheduler")
            .field("pending_total", &self.pending_total())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
