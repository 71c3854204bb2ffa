//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the in-process delivery fabric.

/// Static credential table adapters.
pub mod auth;

/// Group-keyed event fan-out bus.
pub mod bus;

/// Configuration loading.
pub mod config;

/// HTTP API server (ingestion, SSE stream, health, metrics).
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-memory storage and membership adapters.
pub mod persistence;

/// Per-group batching and flush timers.
pub mod scheduler;

/// OpenTelemetry tracing integration.
pub mod telemetry;
