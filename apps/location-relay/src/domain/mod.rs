//! Domain Layer
//!
//! Core types with no I/O dependencies.

/// Location payloads, validation, and the stream event envelope.
pub mod location;

/// Subscriber and group identity types.
pub mod subscription;
