//! Location Relay Binary
//!
//! Starts the location fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin location-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `RELAY_BEARER_TOKENS`: `token:userId` pairs for the ingestion endpoint
//! - `RELAY_API_KEYS`: `key:subscriberId:groupId` triples for the stream endpoint
//!
//! ## Optional
//! - `RELAY_HTTP_PORT`: API server port (default: 8085)
//! - `RELAY_HEARTBEAT_INTERVAL_SECS`: SSE heartbeat interval (default: 15)
//! - `RELAY_STREAM_CHANNEL_CAPACITY`: per-subscriber buffer (default: 256)
//! - `RELAY_DEFAULT_FREQUENCY_SECS`: flush interval fallback (default: 30)
//! - `RELAY_MIN_FREQUENCY_SECS`: flush interval lower clamp (default: 1)
//! - `RELAY_GROUP_MEMBERSHIPS`: `userId:groupId[:frequencySecs]` triples
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: location-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::{Duration, Instant};

use location_relay::application::services::{IngestConfig, IngestService};
use location_relay::infrastructure::auth::{StaticBearerTokens, StaticStreamKeys};
use location_relay::infrastructure::bus::EventBus;
use location_relay::infrastructure::http::{ApiServer, ApiState};
use location_relay::infrastructure::persistence::{
    InMemoryLocationStore, InMemoryMembershipDirectory, Membership, MembershipState,
};
use location_relay::infrastructure::scheduler::BatchingScheduler;
use location_relay::infrastructure::telemetry;
use location_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Location Relay");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Delivery fabric: bus and scheduler
    let bus = Arc::new(EventBus::new());
    let scheduler = Arc::new(BatchingScheduler::new(
        Arc::clone(&bus),
        shutdown_token.child_token(),
    ));

    // Storage and membership adapters
    let store = Arc::new(InMemoryLocationStore::new());
    let directory = Arc::new(InMemoryMembershipDirectory::new());
    load_memberships(&directory);

    // Credential tables
    let bearer_tokens = Arc::new(StaticBearerTokens::from_env()?);
    let stream_keys = Arc::new(StaticStreamKeys::from_env()?);
    tracing::info!(
        bearer_tokens = bearer_tokens.len(),
        stream_keys = stream_keys.len(),
        "Credential tables loaded"
    );

    // Ingestion pipeline
    let ingest = Arc::new(IngestService::new(
        store,
        directory,
        Arc::clone(&scheduler),
        IngestConfig {
            default_frequency_secs: config.scheduler.default_frequency_secs,
            min_frequency_secs: config.scheduler.min_frequency_secs,
        },
    ));

    // API server
    let state = Arc::new(ApiState {
        ingest,
        bus,
        scheduler: Arc::clone(&scheduler),
        token_auth: bearer_tokens,
        stream_auth: stream_keys,
        stream: config.stream.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: Instant::now(),
    });
    let api_server = ApiServer::new(config.server.http_port, state, shutdown_token.clone());

    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Location relay ready");

    await_shutdown(shutdown_token).await;
    scheduler.shutdown();

    tracing::info!("Location relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        heartbeat_interval_secs = config.stream.heartbeat_interval.as_secs(),
        channel_capacity = config.stream.channel_capacity,
        default_frequency_secs = config.scheduler.default_frequency_secs,
        min_frequency_secs = config.scheduler.min_frequency_secs,
        "Configuration loaded"
    );
}

/// Seed the membership directory from `RELAY_GROUP_MEMBERSHIPS`.
///
/// Format: comma-separated `userId:groupId[:frequencySecs]` entries, all
/// active. Placeholder for the account-system adapter.
fn load_memberships(directory: &InMemoryMembershipDirectory) {
    let Ok(raw) = std::env::var("RELAY_GROUP_MEMBERSHIPS") else {
        return;
    };
    let mut loaded = 0_usize;
    for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
        let mut parts = entry.trim().splitn(3, ':');
        let (Some(user), Some(group)) = (parts.next(), parts.next()) else {
            tracing::warn!(entry, "Skipping malformed membership entry");
            continue;
        };
        let frequency_secs = parts.next().and_then(|f| f.parse().ok());
        directory.add_membership(
            user,
            Membership {
                group_id: group.to_string(),
                frequency_secs,
                state: MembershipState::Active,
            },
        );
        loaded += 1;
    }
    tracing::info!(memberships = loaded, "Membership directory seeded");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
