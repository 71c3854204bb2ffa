//! Application Layer
//!
//! Ports (interfaces to external systems) and the services that
//! orchestrate the domain across them.

pub mod ports;
pub mod services;
