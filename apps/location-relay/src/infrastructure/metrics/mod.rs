//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: location reports received, rejected, persisted
//! - **Scheduler**: pending updates, coalesced updates, flush passes
//! - **Fan-out**: events published and dropped, live stream subscribers
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the API server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingestion counters
    describe_counter!(
        "location_relay_updates_received_total",
        "Location reports accepted by the ingestion endpoint"
    );
    describe_counter!(
        "location_relay_updates_rejected_total",
        "Location reports rejected before queueing"
    );

    // Scheduler
    describe_gauge!(
        "location_relay_pending_updates",
        "Location updates currently queued awaiting a flush"
    );
    describe_counter!(
        "location_relay_updates_coalesced_total",
        "Pending updates replaced in place by a newer report for the same device"
    );
    describe_counter!(
        "location_relay_flushes_total",
        "Scheduler flush passes that published at least one update"
    );
    describe_histogram!(
        "location_relay_flush_batch_size",
        "Updates published per group per flush"
    );

    // Fan-out
    describe_counter!(
        "location_relay_events_published_total",
        "Location events delivered to stream subscribers"
    );
    describe_counter!(
        "location_relay_events_dropped_total",
        "Location events dropped at a subscriber sink"
    );
    describe_gauge!(
        "location_relay_stream_subscribers",
        "Live stream subscriptions across all groups"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons an event can be dropped at a subscriber sink.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Subscriber channel was at capacity.
    SinkFull,
    /// Subscriber channel closed before unsubscribe completed.
    SinkClosed,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SinkFull => "sink_full",
            Self::SinkClosed => "sink_closed",
        }
    }
}

/// Reasons a location report can be rejected before queueing.
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    /// Authentication failed.
    Unauthenticated,
    /// No authorized target groups.
    Unauthorized,
    /// Payload failed validation.
    Invalid,
    /// Persistence failed.
    Storage,
}

impl RejectReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::Invalid => "invalid",
            Self::Storage => "storage",
        }
    }
}

/// Record an accepted location report.
pub fn record_update_received() {
    counter!("location_relay_updates_received_total").increment(1);
}

/// Record a rejected location report.
pub fn record_update_rejected(reason: RejectReason) {
    counter!(
        "location_relay_updates_rejected_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the queued-updates gauge.
pub fn set_pending_updates(count: f64) {
    gauge!("location_relay_pending_updates").set(count);
}

/// Record a pending update replaced by a newer one for the same device.
pub fn record_update_coalesced() {
    counter!("location_relay_updates_coalesced_total").increment(1);
}

/// Record a flush pass that published updates for one group.
pub fn record_flush(batch_size: usize) {
    counter!("location_relay_flushes_total").increment(1);
    histogram!("location_relay_flush_batch_size").record(batch_size as f64);
}

/// Record events delivered to subscriber sinks.
pub fn record_events_published(count: u64) {
    if count > 0 {
        counter!("location_relay_events_published_total").increment(count);
    }
}

/// Record an event dropped at a subscriber sink.
pub fn record_event_dropped(reason: DropReason) {
    counter!(
        "location_relay_events_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the live subscriber gauge.
pub fn set_stream_subscribers(count: f64) {
    gauge!("location_relay_stream_subscribers").set(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::SinkFull.as_str(), "sink_full");
        assert_eq!(DropReason::SinkClosed.as_str(), "sink_closed");
    }

    #[test]
    fn reject_reason_as_str() {
        assert_eq!(RejectReason::Unauthenticated.as_str(), "unauthenticated");
        assert_eq!(RejectReason::Unauthorized.as_str(), "unauthorized");
        assert_eq!(RejectReason::Invalid.as_str(), "invalid");
        assert_eq!(RejectReason::Storage.as_str(), "storage");
    }
}
