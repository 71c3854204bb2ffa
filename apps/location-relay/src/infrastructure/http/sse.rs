//! SSE Stream Endpoint
//!
//! Bridges one authenticated HTTP connection to the event bus. The
//! handler subscribes the caller's identity to its group and hands the
//! connection a body stream fed by a forwarder task; the forwarder owns
//! the subscription handle, so whichever way the stream ends (client
//! disconnect, supersede, shutdown) the subscription is released.
//!
//! # Wire Format
//!
//! Every frame is exactly three lines:
//!
//! ```text
//! event: <type>
//! data: <json>
//! <blank>
//! ```
//!
//! A `ready` frame is written before anything else, `location` frames as
//! the scheduler flushes, and a `heartbeat` frame on a fixed interval to
//! keep intermediaries from reaping the idle connection.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::location::{HeartbeatEvent, ReadyEvent, StreamEvent};
use crate::infrastructure::bus::SubscriptionHandle;
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::ApiState;

/// Header carrying the stream credential.
pub const API_KEY_HEADER: &str = "x-api-key";

// =============================================================================
// Frame Encoding
// =============================================================================

/// Encode one event as an SSE frame.
///
/// Returns `None` if the body cannot be serialized; the caller skips the
/// frame rather than corrupting the stream.
#[must_use]
pub fn encode_frame(event: &StreamEvent) -> Option<String> {
    match event.data_json() {
        Ok(data) => Some(format!("event: {}\ndata: {data}\n\n", event.event_type())),
        Err(err) => {
            tracing::error!(event_type = event.event_type(), error = %err, "Unencodable stream event");
            None
        }
    }
}

// =============================================================================
// Stream Handler
// =============================================================================

/// `GET /api/v1/stream` - subscribe the caller to its group's events.
pub async fn stream_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;
    let identity = state
        .stream_auth
        .authenticate_stream_key(key)
        .await
        .map_err(|_| ApiError::Unauthenticated)?;

    let capacity = state.stream.channel_capacity;
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let handle = state.bus.subscribe(
        identity.group_id.clone(),
        identity.subscriber_id.clone(),
        event_tx,
    );

    let (frame_tx, frame_rx) = mpsc::channel::<Result<String, Infallible>>(capacity);
    tokio::spawn(forward_events(
        handle,
        event_rx,
        frame_tx,
        state.stream.heartbeat_interval,
    ));

    tracing::info!(
        group = %identity.group_id,
        subscriber = %identity.subscriber_id,
        "Stream connected"
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        // Disables proxy response buffering, which would defeat live delivery
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(ReceiverStream::new(frame_rx)))
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))
}

/// Pump bus events into the HTTP body stream until either side closes.
///
/// Owns the subscription handle: dropping it on exit unsubscribes. The
/// event channel returning `None` means the bus dropped this sink, which
/// happens when a newer connection for the same subscriber superseded it.
async fn forward_events(
    handle: SubscriptionHandle,
    mut events: mpsc::Receiver<StreamEvent>,
    frames: mpsc::Sender<Result<String, Infallible>>,
    heartbeat_interval: std::time::Duration,
) {
    let group_id = handle.group_id().to_string();

    let ready = StreamEvent::Ready(ReadyEvent {
        group_id: group_id.clone(),
    });
    if send_frame(&frames, &ready).await.is_err() {
        return;
    }

    // First heartbeat one full interval out; the ready frame covers time zero
    let start = tokio::time::Instant::now() + heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(start, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    tracing::debug!(group = %group_id, "Stream superseded by a newer connection");
                    break;
                };
                if send_frame(&frames, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let event = StreamEvent::Heartbeat(HeartbeatEvent {
                    group_id: group_id.clone(),
                    timestamp: Utc::now(),
                });
                if send_frame(&frames, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(group = %group_id, "Stream disconnected");
    drop(handle);
}

/// Encode and write one frame; `Err` means the client went away.
async fn send_frame(
    frames: &mpsc::Sender<Result<String, Infallible>>,
    event: &StreamEvent,
) -> Result<(), ()> {
    let Some(frame) = encode_frame(event) else {
        return Ok(());
    };
    frames.send(Ok(frame)).await.map_err(|_| ())
}

// =============================================================================
// Tests
// =============================================================================
