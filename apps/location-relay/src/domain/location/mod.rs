//! Location Payloads and the Stream Event Envelope
//!
//! `LocationUpdate` is the validated, immutable payload produced by the
//! ingestion endpoint. `StreamEvent` is the closed set of frames a stream
//! subscriber can receive; its discriminant becomes the SSE `event:` line
//! and its body the `data:` line.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::subscription::{DeviceId, GroupId};

// =============================================================================
// Validation Bounds
// =============================================================================

/// Valid latitude range in decimal degrees.
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);

/// Valid longitude range in decimal degrees.
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// Valid heading range in degrees clockwise from north.
pub const HEADING_RANGE: (f64, f64) = (0.0, 360.0);

/// Current payload schema version tag.
pub const PAYLOAD_VERSION: u32 = 1;

// =============================================================================
// Location Update
// =============================================================================

/// A single validated device position report.
///
/// Immutable once constructed; the batching scheduler and event bus pass
/// it by clone and never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    /// Reporting device identifier.
    pub device_id: DeviceId,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Heading in degrees clockwise from north, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Ground speed in meters per second, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// When the device recorded this position.
    pub recorded_at: DateTime<Utc>,
    /// Payload schema version tag.
    pub payload_version: u32,
    /// Free-form client metadata (battery level, trip id, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl LocationUpdate {
    /// Check all value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id.trim().is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if !(LATITUDE_RANGE.0..=LATITUDE_RANGE.1).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange(self.latitude));
        }
        if !(LONGITUDE_RANGE.0..=LONGITUDE_RANGE.1).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange(self.longitude));
        }
        // NaN fails range checks: is_nan is checked explicitly so a NaN
        // never slips through a `<` comparison.
        if let Some(accuracy) = self.accuracy
            && (accuracy.is_nan() || accuracy < 0.0)
        {
            return Err(ValidationError::NegativeAccuracy(accuracy));
        }
        if let Some(speed) = self.speed
            && (speed.is_nan() || speed < 0.0)
        {
            return Err(ValidationError::NegativeSpeed(speed));
        }
        if let Some(heading) = self.heading
            && !(HEADING_RANGE.0..=HEADING_RANGE.1).contains(&heading)
        {
            return Err(ValidationError::HeadingOutOfRange(heading));
        }
        Ok(())
    }
}

/// A payload value violated its allowed range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Device id was empty or whitespace.
    #[error("device id must not be empty")]
    EmptyDeviceId,
    /// Latitude outside [-90, 90].
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    /// Longitude outside [-180, 180].
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    /// Accuracy below zero (or not a number).
    #[error("accuracy {0} must be >= 0")]
    NegativeAccuracy(f64),
    /// Speed below zero (or not a number).
    #[error("speed {0} must be >= 0")]
    NegativeSpeed(f64),
    /// Heading outside [0, 360] (or not a number).
    #[error("heading {0} outside [0, 360]")]
    HeadingOutOfRange(f64),
}

// =============================================================================
// Stream Events
// =============================================================================

/// A location update enriched with the group it is published under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEvent {
    /// Group the update is published to.
    pub group_id: GroupId,
    /// The position report itself.
    #[serde(flatten)]
    pub update: LocationUpdate,
}

/// Body of a `ready` frame, sent once on stream connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    /// Group the stream is subscribed to.
    pub group_id: GroupId,
}

/// Body of a periodic `heartbeat` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatEvent {
    /// Group the stream is subscribed to.
    pub group_id: GroupId,
    /// Server time the heartbeat was emitted.
    pub timestamp: DateTime<Utc>,
}

/// The closed set of frames delivered to stream subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Stream is established and announces its group.
    Ready(ReadyEvent),
    /// A published location update.
    Location(LocationEvent),
    /// Periodic keepalive.
    Heartbeat(HeartbeatEvent),
}

impl StreamEvent {
    /// The wire discriminant, written as the SSE `event:` line.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Location(_) => "location",
            Self::Heartbeat(_) => "heartbeat",
        }
    }

    /// Serialize the event body, written as the SSE `data:` line.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if serialization fails (only possible
    /// for non-string metadata keys, which the types forbid).
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Ready(body) => serde_json::to_string(body),
            Self::Location(body) => serde_json::to_string(body),
            Self::Heartbeat(body) => serde_json::to_string(body),
        }
    }

    /// The group this event belongs to.
    #[must_use]
    pub fn group_id(&self) -> &str {
        match self {
            Self::Ready(body) => &body.group_id,
            Self::Location(body) => &body.group_id,
            Self::Heartbeat(body) => &body.group_id,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
