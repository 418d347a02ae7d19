//! Award Explorer - Analytics engine for government contract-award data
//!
//! This library provides an in-process exploration engine over an immutable
//! contract-award snapshot with:
//! - Chip-style filters compiled to a typed, NULL-safe predicate tree
//! - Single-pass aggregation with yearly/monthly series and top-N tables
//! - Value-distribution histograms and cross-entity drill-down
//! - Batched, cancellable CSV export
//! - TTL result caching and a bounded background task pool

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod filter;
pub mod types;

/// Read-only snapshot store with schema validation
pub mod dataset;

/// Filter compilation into executable query plans
pub mod query;

/// Summary, time-series and per-dimension aggregation
pub mod aggregate;

/// Paginated record search
pub mod search;

/// Contract-amount distribution
pub mod histogram;

/// Streaming CSV export with cooperative cancellation
pub mod export;

/// TTL result cache keyed by normalized filter fingerprints
pub mod cache;

/// Background task orchestration with retries and progress events
pub mod task;

/// Wire-shaped requests and the service facade
pub mod api;

/// Background maintenance services with graceful shutdown
pub mod service;

/// Configuration management with TOML support
pub mod config;

// Re-export main types
pub use api::ExplorerService;
pub use cache::Fingerprint;
pub use config::Config;
pub use dataset::{ContractStore, SharedStore, SnapshotHeader};
pub use error::{Error, Result};
pub use filter::{FilterSpec, TimeRange, ValueRange};
pub use types::{ContractRecord, Dimension, EntityAggregate};
