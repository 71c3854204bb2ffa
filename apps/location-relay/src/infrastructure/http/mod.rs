//! HTTP API Server
//!
//! Single axum server carrying every HTTP surface of the relay:
//!
//! - `POST /api/v1/locations` - device location ingestion (bearer token)
//! - `GET /api/v1/stream` - live SSE event stream (API key)
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! Both API endpoints are thin: authentication and response shaping live
//! here, everything else is delegated to the ingestion service, the
//! scheduler, and the event bus.

mod error;
mod sse;

pub use error::ApiError;
pub use sse::{API_KEY_HEADER, encode_frame};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{StreamKeyAuthenticatorPort, TokenAuthenticatorPort};
use crate::application::services::{IngestOptions, IngestService};
use crate::domain::location::{LocationUpdate, PAYLOAD_VERSION};
use crate::domain::subscription::GroupId;
use crate::infrastructure::bus::SharedEventBus;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::metrics::{self, RejectReason, get_metrics_handle};
use crate::infrastructure::scheduler::SharedScheduler;

// =============================================================================
// Server State
// =============================================================================

/// Shared state behind every handler.
pub struct ApiState {
    /// Ingestion pipeline.
    pub ingest: Arc<IngestService>,
    /// Fan-out bus the stream endpoint subscribes to.
    pub bus: SharedEventBus,
    /// Scheduler, for health introspection.
    pub scheduler: SharedScheduler,
    /// Bearer-token authenticator for the ingestion endpoint.
    pub token_auth: Arc<dyn TokenAuthenticatorPort>,
    /// API-key authenticator for the stream endpoint.
    pub stream_auth: Arc<dyn StreamKeyAuthenticatorPort>,
    /// Stream endpoint tuning.
    pub stream: StreamSettings,
    /// Service version reported by `/health`.
    pub version: String,
    /// Server start time.
    pub started_at: Instant,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Create the axum router with all endpoints.
#[must_use]
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/locations", post(ingest_handler))
        .route("/api/v1/stream", get(sse::stream_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// API Server
// =============================================================================

/// API server error.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind the listen port.
    #[error("failed to bind port {0}: {1}")]
    BindFailed(u16, String),
    /// Server terminated with an error.
    #[error("API server failed: {0}")]
    ServerFailed(String),
}

/// The relay's HTTP server.
#[derive(Debug)]
pub struct ApiServer {
    port: u16,
    state: Arc<ApiState>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ApiState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let app = create_router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

// =============================================================================
// Ingestion Endpoint
// =============================================================================

/// Device location report payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Reporting device identifier.
    pub device_id: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters.
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Heading in degrees clockwise from north.
    #[serde(default)]
    pub heading: Option<f64>,
    /// Ground speed in meters per second.
    #[serde(default)]
    pub speed: Option<f64>,
    /// When the device recorded the position; defaults to receipt time.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    /// Free-form client metadata.
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    /// Restrict fan-out to these groups (intersected with memberships).
    #[serde(default)]
    pub group_ids: Option<Vec<GroupId>>,
    /// Flush frequency override in whole seconds.
    #[serde(default)]
    pub frequency_seconds: Option<u64>,
}

impl IngestRequest {
    fn into_parts(self) -> (LocationUpdate, IngestOptions) {
        let update = LocationUpdate {
            device_id: self.device_id,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            heading: self.heading,
            speed: self.speed,
            recorded_at: self.recorded_at.unwrap_or_else(Utc::now),
            payload_version: PAYLOAD_VERSION,
            metadata: self.metadata,
        };
        let options = IngestOptions {
            group_ids: self.group_ids,
            frequency_secs: self.frequency_seconds,
        };
        (update, options)
    }
}

/// Acceptance response for a queued report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Always `"accepted"`.
    pub status: &'static str,
    /// Store-assigned identifier of the persisted record.
    pub id: String,
    /// Server time the record was written.
    pub received_at: DateTime<Utc>,
    /// Groups the report was queued for, primary group first.
    pub target_groups: Vec<GroupId>,
}

/// `POST /api/v1/locations` - authenticate, then run the ingestion pipeline.
async fn ingest_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        metrics::record_update_rejected(RejectReason::Unauthenticated);
        ApiError::Unauthenticated
    })?;
    let user_id = state
        .token_auth
        .authenticate_bearer(token)
        .await
        .map_err(|_| {
            metrics::record_update_rejected(RejectReason::Unauthenticated);
            ApiError::Unauthenticated
        })?;

    let (update, options) = request.into_parts();
    let accepted = state.ingest.ingest(&user_id, update, options).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted",
            id: accepted.record_id,
            received_at: accepted.received_at,
            target_groups: accepted.target_groups,
        }),
    ))
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

// =============================================================================
// Health and Metrics Endpoints
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"`; the process serves traffic or it is gone.
    pub status: &'static str,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Live stream subscriptions across all groups.
    pub stream_subscribers: usize,
    /// Location updates queued awaiting a flush.
    pub pending_updates: usize,
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream_subscribers: state.bus.total_subscribers(),
        pending_updates: state.scheduler.pending_total(),
    };
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler() -> impl IntoResponse {
    (StatusCode::OK, "READY")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use super::*;
    use crate::application::services::IngestConfig;
    use crate::domain::subscription::StreamIdentity;
    use crate::infrastructure::auth::{StaticBearerTokens, StaticStreamKeys};
    use crate::infrastructure::bus::EventBus;
    use crate::infrastructure::persistence::{
        InMemoryLocationStore, InMemoryMembershipDirectory, Membership, MembershipState,
    };
    use crate::infrastructure::scheduler::BatchingScheduler;

    fn make_state() -> Arc<ApiState> {
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(BatchingScheduler::new(
            Arc::clone(&bus),
            CancellationToken::new(),
        ));

        let store = Arc::new(InMemoryLocationStore::new());
        let directory = Arc::new(InMemoryMembershipDirectory::new());
        directory.add_membership(
            "u1",
            Membership {
                group_id: "g1".to_string(),
                frequency_secs: Some(5),
                state: MembershipState::Active,
            },
        );

        let ingest = Arc::new(IngestService::new(
            store,
            directory,
            Arc::clone(&scheduler),
            IngestConfig::default(),
        ));

        Arc::new(ApiState {
            ingest,
            bus,
            scheduler,
            token_auth: Arc::new(StaticBearerTokens::new([(
                "tok-1".to_string(),
                "u1".to_string(),
            )])),
            stream_auth: Arc::new(StaticStreamKeys::new([(
                "key-1".to_string(),
                StreamIdentity::new("sub-1".to_string(), "g1".to_string()),
            )])),
            stream: StreamSettings::default(),
            version: "test".to_string(),
            started_at: Instant::now(),
        })
    }

    fn ingest_body(lat: f64) -> Body {
        Body::from(
            serde_json::json!({
                "deviceId": "d1",
                "latitude": lat,
                "longitude": 2.0,
            })
            .to_string(),
        )
    }

    async fn send_ingest(app: Router, auth: Option<&str>, lat: f64) -> StatusCode {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/locations")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let response = app
            .oneshot(builder.body(ingest_body(lat)).unwrap())
            .await
            .unwrap();
        response.status()
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ingest_accepts_valid_report() {
        let app = create_router(make_state());
        let status = send_ingest(app, Some("Bearer tok-1"), 37.0).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn ingest_response_carries_the_record_receipt() {
        let app = create_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/locations")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, "Bearer tok-1")
                    .body(ingest_body(37.0))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json = response_json(response).await;
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["targetGroups"], serde_json::json!(["g1"]));
        assert!(
            json["id"].as_str().is_some_and(|id| !id.is_empty()),
            "body: {json}"
        );
        assert!(json["receivedAt"].is_string(), "body: {json}");
    }

    #[tokio::test]
    async fn ingest_scopes_fanout_to_requested_groups() {
        let state = make_state();

        let send = |body: serde_json::Value| {
            let app = create_router(Arc::clone(&state));
            async move {
                app.oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/locations")
                        .header(header::CONTENT_TYPE, "application/json")
                        .header(header::AUTHORIZATION, "Bearer tok-1")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap()
            }
        };

        // A candidate list naming a membership scopes fan-out to it
        let response = send(serde_json::json!({
            "deviceId": "d1",
            "latitude": 1.0,
            "longitude": 2.0,
            "groupIds": ["g1"],
            "frequencySeconds": 5,
        }))
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = response_json(response).await;
        assert_eq!(json["targetGroups"], serde_json::json!(["g1"]));

        // A candidate list with no membership overlap is a rejection
        let response = send(serde_json::json!({
            "deviceId": "d1",
            "latitude": 1.0,
            "longitude": 2.0,
            "groupIds": ["not-a-member"],
        }))
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn ingest_rejects_missing_and_bad_credentials() {
        let state = make_state();
        for auth in [None, Some("Bearer wrong"), Some("Basic tok-1")] {
            let status = send_ingest(create_router(Arc::clone(&state)), auth, 37.0).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn ingest_rejects_out_of_range_payload() {
        let app = create_router(make_state());
        let status = send_ingest(app, Some("Bearer tok-1"), 91.0).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn stream_rejects_missing_key() {
        let app = create_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stream_accepts_valid_key() {
        let app = create_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stream")
                    .header(API_KEY_HEADER, "key-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let app = create_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
