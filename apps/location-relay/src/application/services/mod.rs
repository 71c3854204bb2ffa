//! Application Services
//!
//! Application services coordinate domain logic and infrastructure
//! adapters. The ingestion service owns the validate / persist / resolve /
//! queue pipeline behind the HTTP surface.

mod ingest;

pub use ingest::{IngestAccepted, IngestConfig, IngestError, IngestOptions, IngestService};
