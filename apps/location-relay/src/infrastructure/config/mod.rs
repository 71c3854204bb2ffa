//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, RelayConfig, SchedulerSettings, ServerSettings, StreamSettings,
};
