//! Configuration management
//!
//! TOML-backed configuration with environment variable overrides and
//! sensible defaults. Every limit the engines consult lives here so
//! deployments can tune interactive budgets, cache freshness and the
//! task-pool size without recompiling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Engine limits and heuristics
    #[serde(default)]
    pub engine: EngineConfig,

    /// Result cache freshness
    #[serde(default)]
    pub cache: CacheConfig,

    /// Task orchestration
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Snapshot location (consumed by the loader, not the engines)
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// Engine limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Row budget for interactive aggregation/histogram calls; filtered
    /// sets larger than this yield a capacity error telling the caller to
    /// resubmit as a task
    #[serde(default = "default_interactive_row_budget")]
    pub interactive_row_budget: usize,

    /// Soft timeout for interactive calls
    #[serde(default = "default_soft_timeout_ms")]
    pub soft_timeout_ms: u64,

    /// Rows pulled per export batch; also the cancellation check interval
    #[serde(default = "default_export_batch_rows")]
    pub export_batch_rows: usize,

    /// Average serialized row width used by export size estimates,
    /// calibrated from observed exports
    #[serde(default = "default_avg_row_bytes")]
    pub avg_export_row_bytes: usize,

    /// Top-N rows per dimension table in a full aggregate response
    #[serde(default = "default_dimension_top_n")]
    pub dimension_top_n: usize,
}

/// Cache freshness per operation kind
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// TTL for aggregate/histogram results, seconds
    #[serde(default = "default_aggregate_ttl_secs")]
    pub aggregate_ttl_secs: u64,

    /// TTL for filter-option listings, seconds
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,

    /// TTL for paginated search pages, seconds
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,

    /// Maximum cached entries before the oldest are evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Task orchestration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Concurrent workers; bounds heavy queries against the snapshot
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queued submissions before submit blocks
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries, milliseconds (multiplied by attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long finished tasks stay visible before sweeping, seconds
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
}

/// Snapshot location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    /// Directory holding the columnar snapshot files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

// Default value functions
fn default_interactive_row_budget() -> usize {
    2_000_000
}
fn default_soft_timeout_ms() -> u64 {
    10_000
}
fn default_export_batch_rows() -> usize {
    50_000
}
fn default_avg_row_bytes() -> usize {
    250
}
fn default_dimension_top_n() -> usize {
    20
}
fn default_aggregate_ttl_secs() -> u64 {
    1_800
}
fn default_listing_ttl_secs() -> u64 {
    300
}
fn default_search_ttl_secs() -> u64 {
    600
}
fn default_max_entries() -> usize {
    10_000
}
fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    256
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_result_ttl_secs() -> u64 {
    3_600
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/snapshot")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interactive_row_budget: default_interactive_row_budget(),
            soft_timeout_ms: default_soft_timeout_ms(),
            export_batch_rows: default_export_batch_rows(),
            avg_export_row_bytes: default_avg_row_bytes(),
            dimension_top_n: default_dimension_top_n(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            aggregate_ttl_secs: default_aggregate_ttl_secs(),
            listing_ttl_secs: default_listing_ttl_secs(),
            search_ttl_secs: default_search_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            result_ttl_secs: default_result_ttl_secs(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Wall-clock budget for one interactive call
///
/// Engines consult it at row intervals during a scan; overruns surface as
/// a timeout error telling the caller to resubmit the same criteria as a
/// background task.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start the clock on a fresh budget
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Fail with a timeout error once the budget is spent
    pub fn check(&self) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.budget {
            return Err(Error::SoftTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Soft wall-clock budget for interactive calls
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }

    /// Fresh deadline for one interactive call
    pub fn deadline(&self) -> Deadline {
        Deadline::start(self.soft_timeout())
    }
}

impl CacheConfig {
    /// TTL for aggregate and histogram results
    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(self.aggregate_ttl_secs)
    }

    /// TTL for filter-option listings
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }

    /// TTL for search pages
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }
}

impl TaskConfig {
    /// Backoff before retry `attempt` (1-based), linear in the attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms * u64::from(attempt))
    }

    /// How long finished tasks stay visible
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("failed to parse config file {}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("AWARD_EXPLORER_DATA_DIR") {
            self.snapshot.data_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var("AWARD_EXPLORER_WORKERS") {
            if let Ok(w) = workers.parse() {
                self.tasks.workers = w;
            }
        }
    }

    /// Check limits are internally coherent
    pub fn validate(&self) -> Result<()> {
        if self.engine.export_batch_rows == 0 {
            return Err(Error::Configuration(
                "engine.export_batch_rows must be positive".to_string(),
            ));
        }
        if self.tasks.workers == 0 {
            return Err(Error::Configuration(
                "tasks.workers must be positive".to_string(),
            ));
        }
        if self.tasks.queue_depth == 0 {
            return Err(Error::Configuration(
                "tasks.queue_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            export_batch_rows = 1000

            [tasks]
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.export_batch_rows, 1_000);
        assert_eq!(config.tasks.workers, 2);
        // untouched sections keep defaults
        assert_eq!(config.cache.aggregate_ttl_secs, 1_800);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config: Config = toml::from_str("[tasks]\nworkers = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadline_expires_and_holds() {
        let spent = Deadline::start(Duration::ZERO);
        assert_eq!(spent.check().unwrap_err().kind(), "timeout_error");

        let generous = Deadline::start(Duration::from_secs(3_600));
        assert!(generous.check().is_ok());
    }

    #[test]
    fn test_backoff_is_linear_in_attempt() {
        let tasks = TaskConfig::default();
        assert_eq!(tasks.backoff_for(1), Duration::from_millis(500));
        assert_eq!(tasks.backoff_for(3), Duration::from_millis(1_500));
    }
}
