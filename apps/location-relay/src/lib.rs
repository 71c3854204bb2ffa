#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Location Relay - Live Location Fan-Out Backend
//!
//! An HTTP backend that accepts device GPS reports, persists them, and
//! fans them out to live SSE subscribers scoped by authorization group,
//! batching delivery to each group's configured update frequency.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core location and identity types
//!   - `location`: Validated position payloads and the stream event set
//!   - `subscription`: Group, user, device, and subscriber identity
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for storage, group resolution, credentials
//!   - `services`: The ingestion pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bus`: Group-keyed pub/sub fan-out
//!   - `scheduler`: Per-group coalescing and flush timers
//!   - `http`: axum server (ingestion, SSE stream, health, metrics)
//!   - `auth` / `persistence`: static credential and in-memory storage adapters
//!   - `config` / `metrics` / `telemetry`: ambient concerns
//!
//! # Data Flow
//!
//! ```text
//! Device ──POST──► Ingestion ──► Store
//!                      │
//!                      ▼
//!                  Scheduler ──flush──► Event Bus ──► SSE Stream ──► Client 1
//!                  (coalesce,                                    └─► Client N
//!                   frequency buckets)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core location types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::location::{
    HeartbeatEvent, LocationEvent, LocationUpdate, PAYLOAD_VERSION, ReadyEvent, StreamEvent,
    ValidationError,
};
pub use domain::subscription::{DeviceId, GroupId, StreamIdentity, SubscriberId, UserId};

// Application services and ports
pub use application::ports::{
    AuthError, AuthorizerError, GroupAuthorizerPort, GroupTarget, LocationStoreError,
    LocationStorePort, RecordReceipt, StreamKeyAuthenticatorPort, TokenAuthenticatorPort,
};
pub use application::services::{
    IngestAccepted, IngestConfig, IngestError, IngestOptions, IngestService,
};

// Event bus and scheduler (for integration tests)
pub use infrastructure::bus::{EventBus, SharedEventBus, SubscriptionHandle};
pub use infrastructure::scheduler::{BatchingScheduler, SchedulerError, SharedScheduler};

// HTTP server
pub use infrastructure::http::{
    API_KEY_HEADER, ApiServer, ApiServerError, ApiState, create_router,
};

// Infrastructure config and adapters
pub use infrastructure::auth::{StaticBearerTokens, StaticStreamKeys};
pub use infrastructure::config::{
    ConfigError, RelayConfig, SchedulerSettings, ServerSettings, StreamSettings,
};
pub use infrastructure::persistence::{
    InMemoryLocationStore, InMemoryMembershipDirectory, Membership, MembershipState,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
