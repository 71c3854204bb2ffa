//! Group Event Bus
//!
//! In-process publish/subscribe router keyed by group identifier. Tracks
//! live stream subscribers and delivers location events only to groups
//! that have at least one; publishing to an empty group is a cheap no-op
//! that never constructs the event.
//!
//! # Delivery semantics
//!
//! - Every sink registered at the moment `publish` begins receives the
//!   event; a subscribe that completes after publish begins may miss it
//!   (at-most-once, not exactly-once).
//! - Re-subscribing the same `(group, subscriber)` supersedes the prior
//!   registration. Registrations carry a token so a stale handle's cancel
//!   cannot remove its successor.
//! - Sinks are bounded channels written with `try_send`: a slow or closed
//!   subscriber loses its own frame and never stalls delivery to others.
//!   The registry lock is released before any sink is touched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::location::{LocationEvent, LocationUpdate, StreamEvent};
use crate::domain::subscription::{GroupId, SubscriberId};
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// Delivery channel handed to `subscribe`; the subscriber owns the
/// receiving half.
pub type EventSink = mpsc::Sender<StreamEvent>;

#[derive(Debug)]
struct SinkEntry {
    token: Uuid,
    sink: EventSink,
}

/// Shared event bus reference.
pub type SharedEventBus = Arc<EventBus>;

// =============================================================================
// Event Bus
// =============================================================================

/// Group-keyed broadcast router for location events.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use location_relay::infrastructure::bus::EventBus;
///
/// let bus = Arc::new(EventBus::new());
/// let (tx, _rx) = tokio::sync::mpsc::channel(16);
/// let handle = bus.subscribe("g1".to_string(), "key-1".to_string(), tx);
///
/// assert_eq!(bus.subscriber_count("g1"), 1);
/// handle.cancel();
/// assert_eq!(bus.subscriber_count("g1"), 0);
/// ```
#[derive(Debug, Default)]
pub struct EventBus {
    groups: RwLock<HashMap<GroupId, HashMap<SubscriberId, SinkEntry>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Register `sink` to receive every event published to `group` until
    /// the returned handle is cancelled or dropped.
    ///
    /// An existing registration for the same `(group, subscriber_id)` is
    /// replaced: its sink stops receiving immediately and its handle
    /// becomes a no-op.
    #[must_use]
    pub fn subscribe(
        self: &Arc<Self>,
        group_id: GroupId,
        subscriber_id: SubscriberId,
        sink: EventSink,
    ) -> SubscriptionHandle {
        let token = Uuid::new_v4();
        let superseded = self
            .groups
            .write()
            .entry(group_id.clone())
            .or_default()
            .insert(subscriber_id.clone(), SinkEntry { token, sink })
            .is_some();

        if superseded {
            tracing::debug!(group = %group_id, subscriber = %subscriber_id, "Subscription superseded");
        }
        metrics::set_stream_subscribers(self.total_subscribers() as f64);

        SubscriptionHandle {
            bus: Arc::clone(self),
            group_id,
            subscriber_id,
            token,
            cancelled: false,
        }
    }

    /// Deliver `update`, enriched with `group_id`, to every live sink of
    /// the group. Returns the number of sinks that accepted the event.
    ///
    /// No-ops without constructing the event when the group has no
    /// subscribers.
    pub fn publish(&self, group_id: &str, update: LocationUpdate) -> usize {
        let sinks: Vec<(SubscriberId, EventSink)> = {
            let groups = self.groups.read();
            let Some(subscribers) = groups.get(group_id) else {
                return 0;
            };
            if subscribers.is_empty() {
                return 0;
            }
            subscribers
                .iter()
                .map(|(id, entry)| (id.clone(), entry.sink.clone()))
                .collect()
        };

        let event = StreamEvent::Location(LocationEvent {
            group_id: group_id.to_owned(),
            update,
        });

        let mut delivered = 0;
        for (subscriber_id, sink) in sinks {
            match sink.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::record_event_dropped(metrics::DropReason::SinkFull);
                    tracing::warn!(
                        group = %group_id,
                        subscriber = %subscriber_id,
                        "Dropping event for slow subscriber"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Closing races with unsubscribe on disconnect; the
                    // handle drop will clean up the registration.
                    metrics::record_event_dropped(metrics::DropReason::SinkClosed);
                    tracing::debug!(
                        group = %group_id,
                        subscriber = %subscriber_id,
                        "Sink closed before unsubscribe"
                    );
                }
            }
        }

        metrics::record_events_published(delivered as u64);
        delivered
    }

    /// Publish the same payload to each group in `groups`, skipping groups
    /// with no subscribers before any payload cloning.
    pub fn publish_to_groups(&self, groups: &[GroupId], update: &LocationUpdate) -> usize {
        let mut delivered = 0;
        for group_id in groups {
            if !self.has_subscribers(group_id) {
                continue;
            }
            delivered += self.publish(group_id, update.clone());
        }
        delivered
    }

    /// Whether the group currently has at least one subscriber.
    #[must_use]
    pub fn has_subscribers(&self, group_id: &str) -> bool {
        self.groups
            .read()
            .get(group_id)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    /// Number of live subscribers for the group.
    #[must_use]
    pub fn subscriber_count(&self, group_id: &str) -> usize {
        self.groups
            .read()
            .get(group_id)
            .map_or(0, HashMap::len)
    }

    /// Total live subscribers across all groups.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.groups.read().values().map(HashMap::len).sum()
    }

    /// Remove a registration if it still carries `token`.
    fn unsubscribe(&self, group_id: &GroupId, subscriber_id: &SubscriberId, token: Uuid) {
        let mut groups = self.groups.write();
        let Some(subscribers) = groups.get_mut(group_id) else {
            return;
        };
        // A newer subscribe for the same identity owns the slot now;
        // only the registration that created the token may remove it.
        if subscribers
            .get(subscriber_id)
            .is_some_and(|entry| entry.token == token)
        {
            subscribers.remove(subscriber_id);
            if subscribers.is_empty() {
                groups.remove(group_id);
            }
        }
        drop(groups);
        metrics::set_stream_subscribers(self.total_subscribers() as f64);
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Owned cancellation for one bus registration.
///
/// Cancels exactly once, either explicitly via [`Self::cancel`] or on
/// drop, so cleanup holds on every stream exit path. After cancel
/// returns, no further events reach the sink.
#[derive(Debug)]
pub struct SubscriptionHandle {
    bus: Arc<EventBus>,
    group_id: GroupId,
    subscriber_id: SubscriberId,
    token: Uuid,
    cancelled: bool,
}

impl SubscriptionHandle {
    /// Unsubscribe now instead of at drop.
    pub fn cancel(mut self) {
        self.cancel_once();
    }

    /// The group this handle is subscribed to.
    #[must_use]
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    fn cancel_once(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.bus
                .unsubscribe(&self.group_id, &self.subscriber_id, self.token);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel_once();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::location::PAYLOAD_VERSION;

    fn make_update(device: &str) -> LocationUpdate {
        LocationUpdate {
            device_id: device.to_string(),
            latitude: 37.7749,
            longitude: -122.4194,
            accuracy: None,
            heading: None,
            speed: None,
            recorded_at: Utc::now(),
            payload_version: PAYLOAD_VERSION,
            metadata: None,
        }
    }

    fn sink(capacity: usize) -> (EventSink, mpsc::Receiver<StreamEvent>) {
        mpsc::channel(capacity)
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("g1", make_update("d1")), 0);
        assert!(!bus.has_subscribers("g1"));
    }

    #[tokio::test]
    async fn fan_out_reaches_all_group_sinks_and_no_others() {
        let bus = Arc::new(EventBus::new());
        let (tx1, mut rx1) = sink(8);
        let (tx2, mut rx2) = sink(8);
        let (tx_other, mut rx_other) = sink(8);

        let _h1 = bus.subscribe("g1".to_string(), "a".to_string(), tx1);
        let _h2 = bus.subscribe("g1".to_string(), "b".to_string(), tx2);
        let _h3 = bus.subscribe("g2".to_string(), "c".to_string(), tx_other);

        let delivered = bus.publish("g1", make_update("d1"));
        assert_eq!(delivered, 2);

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event_type(), "location");
            assert_eq!(event.group_id(), "g1");
        }
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn resubscribe_supersedes_old_sink() {
        let bus = Arc::new(EventBus::new());
        let (tx_old, mut rx_old) = sink(8);
        let (tx_new, mut rx_new) = sink(8);

        let old_handle = bus.subscribe("g1".to_string(), "key".to_string(), tx_old);
        let _new_handle = bus.subscribe("g1".to_string(), "key".to_string(), tx_new);

        // Exactly one delivery path remains
        assert_eq!(bus.subscriber_count("g1"), 1);
        assert_eq!(bus.publish("g1", make_update("d1")), 1);
        assert!(rx_old.try_recv().is_err());
        assert!(rx_new.recv().await.is_some());

        // The stale handle must not tear down the replacement
        old_handle.cancel();
        assert_eq!(bus.subscriber_count("g1"), 1);
        assert_eq!(bus.publish("g1", make_update("d2")), 1);
        assert!(rx_new.recv().await.is_some());
    }

    #[test]
    fn cancel_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let (tx, _rx) = sink(8);

        let handle = bus.subscribe("g1".to_string(), "a".to_string(), tx);
        assert!(bus.has_subscribers("g1"));

        handle.cancel();
        assert!(!bus.has_subscribers("g1"));
        assert_eq!(bus.publish("g1", make_update("d1")), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let (tx, _rx) = sink(8);
        {
            let _handle = bus.subscribe("g1".to_string(), "a".to_string(), tx);
            assert_eq!(bus.subscriber_count("g1"), 1);
        }
        assert_eq!(bus.subscriber_count("g1"), 0);
    }

    #[tokio::test]
    async fn full_sink_is_isolated() {
        let bus = Arc::new(EventBus::new());
        let (tx_full, _rx_full) = sink(1);
        let (tx_ok, mut rx_ok) = sink(8);

        let _h1 = bus.subscribe("g1".to_string(), "slow".to_string(), tx_full);
        let _h2 = bus.subscribe("g1".to_string(), "fast".to_string(), tx_ok);

        // First publish fills the slow sink's single slot
        assert_eq!(bus.publish("g1", make_update("d1")), 2);
        // Second publish drops for the slow sink but still reaches the fast one
        assert_eq!(bus.publish("g1", make_update("d2")), 1);

        assert!(rx_ok.recv().await.is_some());
        assert!(rx_ok.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_to_groups_skips_empty() {
        let bus = Arc::new(EventBus::new());
        let (tx, mut rx) = sink(8);
        let _h = bus.subscribe("g2".to_string(), "a".to_string(), tx);

        let groups = vec!["g1".to_string(), "g2".to_string(), "g3".to_string()];
        let delivered = bus.publish_to_groups(&groups, &make_update("d1"));

        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap().group_id(), "g2");
    }

    #[test]
    fn thread_safety_concurrent_subscribe_and_publish() {
        use std::thread;

        let bus = Arc::new(EventBus::new());
        let mut handles = vec![];

        for i in 0..10u32 {
            let bus = Arc::clone(&bus);
            handles.push(thread::spawn(move || {
                let (tx, rx) = mpsc::channel(64);
                let handle =
                    bus.subscribe("shared".to_string(), format!("sub{i}"), tx);
                bus.publish("shared", LocationUpdate {
                    device_id: format!("d{i}"),
                    latitude: 0.0,
                    longitude: 0.0,
                    accuracy: None,
                    heading: None,
                    speed: None,
                    recorded_at: Utc::now(),
                    payload_version: PAYLOAD_VERSION,
                    metadata: None,
                });
                drop(rx);
                handle.cancel();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(bus.total_subscribers(), 0);
    }
}
