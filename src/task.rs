//! Background task orchestration
//!
//! Heavy operations run on a bounded worker pool instead of the request
//! path: submission returns a task id immediately, workers pull jobs from
//! an mpsc queue, and every state change lands in a shared registry and
//! on a broadcast channel so callers can either poll or subscribe.
//!
//! Lifecycle: PENDING -> STARTED -> PROGRESS* -> SUCCESS | FAILURE |
//! CANCELLED. Transient failures (backing store, I/O) retry with a linear
//! backoff; everything else fails on the first attempt. Cancellation is
//! cooperative: a token flips and the running job notices at its next
//! checkpoint.
//!
//! Results do not live in the registry: success payloads land in a
//! TTL-bounded [`ResultCache`] under the fingerprint returned at
//! submission, so a result survives exactly as long as its cache entry
//! and repeat submissions of equivalent requests share a key.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

use crate::aggregate::{AggregationEngine, SortBy, SortDirection};
use crate::cache::{Fingerprint, ResultCache};
use crate::config::{CacheConfig, Config, TaskConfig};
use crate::dataset::SharedStore;
use crate::error::{Error, Result};
use crate::export::ExportPipeline;
use crate::filter::FilterSpec;
use crate::histogram::HistogramEngine;
use crate::query::{compile, QueryTarget};
use crate::search::{SearchEngine, SearchSort};
use crate::types::Dimension;

/// Cooperative cancellation flag shared between a task and its callers
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the running job stops at its next checkpoint
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Full aggregate response
    Aggregate,
    /// Paginated dimension table
    Dimension,
    /// Paginated record page
    Search,
    /// Amount distribution
    Histogram,
    /// CSV export to a file
    Export,
}

impl TaskKind {
    /// Stable name for logs and payloads
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Aggregate => "aggregate",
            TaskKind::Dimension => "dimension",
            TaskKind::Search => "search",
            TaskKind::Histogram => "histogram",
            TaskKind::Export => "export",
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, no worker has picked it up
    Pending,
    /// A worker began executing
    Started,
    /// Mid-execution with a progress percentage
    Progress,
    /// Finished with a result payload
    Success,
    /// Finished with an error after exhausting retries
    Failure,
    /// Stopped at a cancellation checkpoint
    Cancelled,
}

impl TaskStatus {
    /// Whether the task will never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled
        )
    }
}

/// A unit of work submitted to the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Compute the full aggregate response
    Aggregate {
        /// Filter criteria
        spec: FilterSpec,
    },
    /// Compute one page of a dimension table
    Dimension {
        /// Filter criteria
        spec: FilterSpec,
        /// Dimension to break down by
        dimension: Dimension,
        /// 1-based page
        page: usize,
        /// Rows per page
        page_size: usize,
        /// Sort key
        #[serde(default)]
        sort_by: SortBy,
        /// Sort direction
        #[serde(default)]
        sort_direction: SortDirection,
    },
    /// Compute one page of matching records
    Search {
        /// Filter criteria
        spec: FilterSpec,
        /// 1-based page
        page: usize,
        /// Rows per page
        page_size: usize,
        /// Sort key
        #[serde(default)]
        sort: SearchSort,
        /// Sort direction
        #[serde(default)]
        direction: SortDirection,
    },
    /// Compute the amount distribution
    Histogram {
        /// Filter criteria
        spec: FilterSpec,
        /// Bucket count
        num_bins: usize,
    },
    /// Stream matching records to a CSV file
    Export {
        /// Filter criteria
        spec: FilterSpec,
        /// Destination file
        path: PathBuf,
    },
}

impl TaskRequest {
    /// The kind of work this request performs
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Aggregate { .. } => TaskKind::Aggregate,
            TaskRequest::Dimension { .. } => TaskKind::Dimension,
            TaskRequest::Search { .. } => TaskKind::Search,
            TaskRequest::Histogram { .. } => TaskKind::Histogram,
            TaskRequest::Export { .. } => TaskKind::Export,
        }
    }

    /// Cache key for this request's result
    ///
    /// Computed over the normalized spec, the operation name and every
    /// parameter that changes the output, so equivalent submissions map
    /// to the same stored result. Fails when the spec is invalid.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let name = self.kind().name();
        Ok(match self {
            TaskRequest::Aggregate { spec } => {
                Fingerprint::compute(&spec.clone().normalized()?, name, &())
            }
            TaskRequest::Dimension {
                spec,
                dimension,
                page,
                page_size,
                sort_by,
                sort_direction,
            } => Fingerprint::compute(
                &spec.clone().normalized()?,
                name,
                &(dimension, page, page_size, sort_by, sort_direction),
            ),
            TaskRequest::Search {
                spec,
                page,
                page_size,
                sort,
                direction,
            } => Fingerprint::compute(
                &spec.clone().normalized()?,
                name,
                &(page, page_size, sort, direction),
            ),
            TaskRequest::Histogram { spec, num_bins } => {
                Fingerprint::compute(&spec.clone().normalized()?, name, num_bins)
            }
            TaskRequest::Export { spec, path } => {
                Fingerprint::compute(&spec.clone().normalized()?, name, path)
            }
        })
    }
}

/// Registry entry describing one task's current state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier
    pub id: Uuid,
    /// What the task computes
    pub kind: TaskKind,
    /// Current lifecycle state
    pub status: TaskStatus,
    /// Completion percentage, 0 through 100
    pub progress: u8,
    /// Human-readable state description
    pub message: String,
    /// Execution attempts so far (1 on first run)
    pub attempts: u32,
    /// Cache key under which the result is stored once SUCCESS
    pub result_key: Fingerprint,
    /// Error description once FAILURE
    pub error: Option<String>,
    /// Machine-readable error kind once FAILURE
    pub error_kind: Option<String>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

/// One state-change notification on the broadcast channel
#[derive(Debug, Clone)]
pub struct TaskEvent {
    /// Task identifier
    pub task_id: Uuid,
    /// State after the change
    pub status: TaskStatus,
    /// Completion percentage after the change
    pub progress: u8,
    /// Description of the change
    pub message: String,
}

/// The compute engines workers execute against
pub struct Engines {
    /// Aggregation and drill-down
    pub aggregation: AggregationEngine,
    /// Paginated record search
    pub search: SearchEngine,
    /// Amount distribution
    pub histogram: HistogramEngine,
    /// CSV export
    pub export: ExportPipeline,
}

impl Engines {
    /// Build every engine over one shared snapshot
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            aggregation: AggregationEngine::new(store.clone(), config.engine.clone()),
            search: SearchEngine::new(store.clone()),
            histogram: HistogramEngine::new(store.clone(), config.engine.clone()),
            export: ExportPipeline::new(store, config.engine.clone()),
        }
    }
}

struct Shared {
    registry: DashMap<Uuid, TaskRecord>,
    cancels: DashMap<Uuid, CancelToken>,
    results: ResultCache<serde_json::Value>,
    events: broadcast::Sender<TaskEvent>,
}

impl Shared {
    /// Record a state change and broadcast it
    ///
    /// Terminal states are final: once a record is SUCCESS, FAILURE or
    /// CANCELLED no further transition touches it. Progress only ever
    /// moves forward; `None` keeps the current percentage, so a retry or
    /// cancellation never rolls a reported figure back.
    fn transition(
        &self,
        id: Uuid,
        status: TaskStatus,
        progress: Option<u8>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let Some(mut record) = self.registry.get_mut(&id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        record.status = status;
        if let Some(pct) = progress {
            record.progress = record.progress.max(pct);
        }
        record.message = message.clone();
        if status.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        let progress = record.progress;
        drop(record);
        let _ = self.events.send(TaskEvent {
            task_id: id,
            status,
            progress,
            message,
        });
    }
}

/// Bounded worker pool executing submitted tasks
///
/// Construct inside a tokio runtime; `new` spawns the workers.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    queue: mpsc::Sender<(Uuid, TaskRequest)>,
    config: TaskConfig,
}

impl TaskOrchestrator {
    /// Spawn the worker pool over a set of engines
    pub fn new(engines: Arc<Engines>, config: TaskConfig, cache: &CacheConfig) -> Self {
        let (tx, rx) = mpsc::channel::<(Uuid, TaskRequest)>(config.queue_depth);
        let (events, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            registry: DashMap::new(),
            cancels: DashMap::new(),
            results: ResultCache::new(cache),
            events,
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..config.workers {
            let rx = rx.clone();
            let shared = shared.clone();
            let engines = engines.clone();
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some((id, request)) = job else {
                        break;
                    };
                    tracing::debug!(worker_id, task_id = %id, kind = request.kind().name(), "Worker picked up task");
                    run_task(shared.clone(), engines.clone(), &config, id, request).await;
                }
            });
        }

        Self {
            shared,
            queue: tx,
            config,
        }
    }

    /// Queue a task, returning its id and the cache key its result will
    /// be stored under
    ///
    /// Blocks only when the queue is at capacity. The key is stable for
    /// equivalent requests, so a caller holding it can fetch the result
    /// later without remembering the task id.
    pub async fn submit(&self, request: TaskRequest) -> Result<(Uuid, Fingerprint)> {
        let result_key = request.fingerprint()?;
        let id = Uuid::new_v4();
        let record = TaskRecord {
            id,
            kind: request.kind(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "queued".to_string(),
            attempts: 0,
            result_key,
            error: None,
            error_kind: None,
            submitted_at: Utc::now(),
            finished_at: None,
        };
        self.shared.registry.insert(id, record);
        self.shared.cancels.insert(id, CancelToken::new());
        self.queue
            .send((id, request))
            .await
            .map_err(|_| Error::BackingStore("task queue is closed".to_string()))?;
        tracing::info!(task_id = %id, result_key = result_key.value(), "Task submitted");
        Ok((id, result_key))
    }

    /// Snapshot of a task's current state
    pub fn status(&self, id: Uuid) -> Option<TaskRecord> {
        self.shared.registry.get(&id).map(|r| r.value().clone())
    }

    /// Fetch a task's stored result by id, if it succeeded and the cache
    /// entry is still live
    pub fn result(&self, id: Uuid) -> Option<serde_json::Value> {
        let key = self.shared.registry.get(&id).map(|r| r.result_key)?;
        self.shared.results.get(key)
    }

    /// Fetch a stored result directly by its cache key
    pub fn fetch(&self, key: Fingerprint) -> Option<serde_json::Value> {
        self.shared.results.get(key)
    }

    /// Request cancellation; true if the task exists and was not terminal
    ///
    /// A task still sitting in the queue is finalized here: no worker
    /// will report on it before pickup, and pickup observes the token.
    pub fn cancel(&self, id: Uuid) -> bool {
        let status = self.shared.registry.get(&id).map(|r| r.status);
        let live = status.map(|s| !s.is_terminal()).unwrap_or(false);
        if live {
            if let Some(token) = self.shared.cancels.get(&id) {
                token.cancel();
            }
            if status == Some(TaskStatus::Pending) {
                self.shared
                    .transition(id, TaskStatus::Cancelled, None, "cancelled before start");
            }
            tracing::info!(task_id = %id, "Task cancellation requested");
        }
        live
    }

    /// Subscribe to state-change events for every task
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }

    /// Drop expired results and terminal tasks older than the result TTL
    pub fn sweep_expired(&self) -> usize {
        let swept_results = self.shared.results.sweep();
        let ttl = chrono::Duration::from_std(self.config.result_ttl())
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let now = Utc::now();
        let before = self.shared.registry.len();
        self.shared.registry.retain(|_, record| {
            record
                .finished_at
                .map(|finished| now - finished < ttl)
                .unwrap_or(true)
        });
        self.shared
            .cancels
            .retain(|id, _| self.shared.registry.contains_key(id));
        swept_results + before - self.shared.registry.len()
    }

    /// Live registry size
    pub fn len(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.shared.registry.is_empty()
    }
}

async fn run_task(
    shared: Arc<Shared>,
    engines: Arc<Engines>,
    config: &TaskConfig,
    id: Uuid,
    request: TaskRequest,
) {
    let cancel = shared
        .cancels
        .get(&id)
        .map(|t| t.value().clone())
        .unwrap_or_default();

    if cancel.is_cancelled() {
        shared.transition(id, TaskStatus::Cancelled, None, "cancelled before start");
        return;
    }
    shared.transition(id, TaskStatus::Started, Some(0), "started");

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Some(mut record) = shared.registry.get_mut(&id) {
            record.attempts = attempt;
        }

        // scans are CPU-bound; keep them off the runtime worker threads
        let outcome = {
            let shared = shared.clone();
            let engines = engines.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || execute(&shared, &engines, id, &request, &cancel))
                .await
                .unwrap_or_else(|join| {
                    Err(Error::BackingStore(format!(
                        "task execution panicked: {}",
                        join
                    )))
                })
        };

        match outcome {
            Ok(result) => {
                let key = shared.registry.get(&id).map(|r| r.result_key);
                if let Some(key) = key {
                    shared.results.insert(key, result, config.result_ttl());
                }
                shared.transition(id, TaskStatus::Success, Some(100), "complete");
                return;
            }
            Err(Error::Cancelled) => {
                shared.transition(id, TaskStatus::Cancelled, None, "cancelled");
                return;
            }
            Err(err) if err.is_transient() && attempt <= config.max_retries => {
                let backoff = config.backoff_for(attempt);
                tracing::warn!(
                    task_id = %id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient task failure, retrying"
                );
                shared.transition(
                    id,
                    TaskStatus::Progress,
                    None,
                    format!("retrying after transient failure: {}", err),
                );
                tokio::time::sleep(backoff).await;
                if cancel.is_cancelled() {
                    shared.transition(id, TaskStatus::Cancelled, None, "cancelled");
                    return;
                }
            }
            Err(err) => {
                tracing::error!(task_id = %id, attempt, error = %err, "Task failed");
                if let Some(mut record) = shared.registry.get_mut(&id) {
                    record.error = Some(err.to_string());
                    record.error_kind = Some(err.kind().to_string());
                }
                shared.transition(id, TaskStatus::Failure, None, format!("failed: {}", err));
                return;
            }
        }
    }
}

// Milestone percentages shared by every kind: compile 20, count 30,
// compute 50..80, serialize 80, done 100.
fn execute(
    shared: &Shared,
    engines: &Engines,
    id: Uuid,
    request: &TaskRequest,
    cancel: &CancelToken,
) -> Result<serde_json::Value> {
    let progress = |pct: u8, message: &str| {
        shared.transition(id, TaskStatus::Progress, Some(pct), message);
    };

    let value = match request {
        TaskRequest::Aggregate { spec } => {
            progress(20, "compiling filters");
            let plan = compile(spec.clone(), QueryTarget::Aggregate)?;
            checkpoint(cancel)?;
            progress(50, "aggregating");
            let result = engines.aggregation.aggregate(&plan)?;
            checkpoint(cancel)?;
            progress(80, "serializing");
            to_value(&result)?
        }
        TaskRequest::Dimension {
            spec,
            dimension,
            page,
            page_size,
            sort_by,
            sort_direction,
        } => {
            progress(20, "compiling filters");
            let plan = compile(spec.clone(), QueryTarget::Aggregate)?;
            checkpoint(cancel)?;
            progress(50, "grouping");
            let (rows, pagination) = engines.aggregation.dimension_paged(
                &plan,
                *dimension,
                *page,
                *page_size,
                *sort_by,
                *sort_direction,
            )?;
            progress(80, "serializing");
            serde_json::json!({ "rows": to_value(&rows)?, "pagination": to_value(&pagination)? })
        }
        TaskRequest::Search {
            spec,
            page,
            page_size,
            sort,
            direction,
        } => {
            progress(20, "compiling filters");
            let plan = compile(spec.clone(), QueryTarget::Search)?;
            checkpoint(cancel)?;
            progress(50, "collecting page");
            let page = engines.search.page(&plan, *page, *page_size, *sort, *direction)?;
            progress(80, "serializing");
            to_value(&page)?
        }
        TaskRequest::Histogram { spec, num_bins } => {
            progress(20, "compiling filters");
            let plan = compile(spec.clone(), QueryTarget::Histogram)?;
            checkpoint(cancel)?;
            progress(50, "binning");
            let result = engines.histogram.distribution(&plan, *num_bins)?;
            progress(80, "serializing");
            to_value(&result)?
        }
        TaskRequest::Export { spec, path } => {
            progress(20, "compiling filters");
            let plan = compile(spec.clone(), QueryTarget::Export)?;
            checkpoint(cancel)?;
            let estimate = engines.export.estimate(&plan)?;
            progress(30, "streaming");
            let file = std::fs::File::create(path)?;
            let writer = std::io::BufWriter::new(file);
            let total = estimate.rows.max(1);
            let summary = engines.export.write_records(&plan, writer, cancel, |rows| {
                // map streamed rows onto the 30..=90 band
                let pct = 30 + ((rows.min(total) * 60) / total) as u8;
                progress(pct, "streaming");
            })?;
            progress(90, "finalizing");
            serde_json::json!({
                "path": path,
                "rows_written": summary.rows_written,
                "estimated_bytes": estimate.estimated_bytes,
            })
        }
    };
    Ok(value)
}

fn checkpoint(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Configuration(format!("failed to serialize task result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ContractStore, SnapshotHeader};
    use crate::types::ContractRecord;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn store(rows: usize, extended: bool) -> SharedStore {
        let records = (0..rows)
            .map(|i| ContractRecord {
                award_date: NaiveDate::from_ymd_opt(2023, 1, 1),
                awardee_name: Some("Acme".to_string()),
                business_category: None,
                organization_name: None,
                area_of_delivery: Some("Cagayan".to_string()),
                contract_amount: Some(Decimal::new(i as i64 + 1, 0)),
                award_title: "Concreting".to_string(),
                notice_title: "Notice".to_string(),
                contract_number: format!("C-{}", i),
                search_text: "concreting acme".to_string(),
            })
            .collect();
        let extended = extended.then(Vec::new);
        Arc::new(
            ContractStore::from_snapshot(SnapshotHeader::current("test"), records, extended)
                .unwrap(),
        )
    }

    fn orchestrator(store: SharedStore, tasks: TaskConfig) -> TaskOrchestrator {
        let config = Config {
            tasks: tasks.clone(),
            ..Config::default()
        };
        let engines = Arc::new(Engines::new(store, &config));
        TaskOrchestrator::new(engines, tasks, &config.cache)
    }

    async fn wait_terminal(orchestrator: &TaskOrchestrator, id: Uuid) -> TaskRecord {
        loop {
            if let Some(record) = orchestrator.status(id) {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_aggregate_task_succeeds_with_result() {
        let orchestrator = orchestrator(store(10, false), TaskConfig::default());
        let (id, key) = orchestrator
            .submit(TaskRequest::Aggregate {
                spec: FilterSpec::default(),
            })
            .await
            .unwrap();
        let record = wait_terminal(&orchestrator, id).await;
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(record.progress, 100);
        assert_eq!(record.result_key, key);
        // the result is reachable both by task id and by cache key
        let result = orchestrator.result(id).unwrap();
        assert_eq!(result["summary"]["count"], 10);
        assert_eq!(orchestrator.fetch(key), Some(result));
    }

    #[tokio::test]
    async fn test_equivalent_submissions_share_a_result_key() {
        let orchestrator = orchestrator(store(3, false), TaskConfig::default());
        let (id_a, key_a) = orchestrator
            .submit(TaskRequest::Aggregate {
                spec: FilterSpec::builder()
                    .contractor(" Acme ")
                    .contractor("Zeta")
                    .build()
                    .unwrap(),
            })
            .await
            .unwrap();
        let (id_b, key_b) = orchestrator
            .submit(TaskRequest::Aggregate {
                spec: FilterSpec::builder()
                    .contractor("Zeta")
                    .contractor("Acme")
                    .build()
                    .unwrap(),
            })
            .await
            .unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(key_a, key_b);
    }

    #[tokio::test]
    async fn test_lifecycle_events_reach_subscribers() {
        let orchestrator = orchestrator(store(5, false), TaskConfig::default());
        let mut events = orchestrator.subscribe();
        let (id, _) = orchestrator
            .submit(TaskRequest::Histogram {
                spec: FilterSpec::default(),
                num_bins: 10,
            })
            .await
            .unwrap();

        let mut statuses = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            if event.task_id != id {
                continue;
            }
            statuses.push(event.status);
            if event.status.is_terminal() {
                break;
            }
        }
        assert_eq!(statuses.first(), Some(&TaskStatus::Started));
        assert_eq!(statuses.last(), Some(&TaskStatus::Success));
        assert!(statuses.contains(&TaskStatus::Progress));
    }

    #[tokio::test]
    async fn test_cancel_pending_task_finalizes_immediately() {
        // no workers: the submission stays PENDING in the queue
        let tasks = TaskConfig {
            workers: 0,
            ..TaskConfig::default()
        };
        let orchestrator = orchestrator(store(5, false), tasks);
        let (id, _) = orchestrator
            .submit(TaskRequest::Aggregate {
                spec: FilterSpec::default(),
            })
            .await
            .unwrap();
        assert_eq!(orchestrator.status(id).unwrap().status, TaskStatus::Pending);

        assert!(orchestrator.cancel(id));
        let record = orchestrator.status(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.finished_at.is_some());
        // terminal state is sticky
        assert!(!orchestrator.cancel(id));
    }

    #[tokio::test]
    async fn test_cancellation_mid_stream_lands_cancelled() {
        let dir = std::env::temp_dir().join(format!("award-cancel-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("contracts.csv");

        // one-row batches make every row a cancellation checkpoint
        let config = Config {
            engine: crate::config::EngineConfig {
                export_batch_rows: 1,
                ..Default::default()
            },
            ..Config::default()
        };
        let engines = Arc::new(Engines::new(store(50_000, false), &config));
        let orchestrator =
            TaskOrchestrator::new(engines, config.tasks.clone(), &config.cache);
        let (id, _) = orchestrator
            .submit(TaskRequest::Export {
                spec: FilterSpec::default(),
                path,
            })
            .await
            .unwrap();

        // wait for the streaming band, then cancel
        loop {
            let record = orchestrator.status(id).unwrap();
            assert!(
                !record.status.is_terminal(),
                "export finished before cancellation was requested"
            );
            if record.status == TaskStatus::Progress && (30..90).contains(&record.progress) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(orchestrator.cancel(id));
        let record = wait_terminal(&orchestrator, id).await;
        assert_eq!(record.status, TaskStatus::Cancelled);
        // reported progress never rolls back on cancellation
        assert!(record.progress >= 30);
        assert!(orchestrator.result(id).is_none());
        // terminal state is sticky
        assert!(!orchestrator.cancel(id));
        assert_eq!(
            orchestrator.status(id).unwrap().status,
            TaskStatus::Cancelled
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_false() {
        let orchestrator = orchestrator(store(1, false), TaskConfig::default());
        assert!(!orchestrator.cancel(Uuid::new_v4()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_fail() {
        let tasks = TaskConfig {
            max_retries: 2,
            retry_backoff_ms: 100,
            ..TaskConfig::default()
        };
        // extended partition requested but absent: a backing-store error
        let orchestrator = orchestrator(store(5, false), tasks);
        let (id, _) = orchestrator
            .submit(TaskRequest::Aggregate {
                spec: FilterSpec::builder()
                    .include_extended(true)
                    .build()
                    .unwrap(),
            })
            .await
            .unwrap();
        let record = wait_terminal(&orchestrator, id).await;
        assert_eq!(record.status, TaskStatus::Failure);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.error_kind.as_deref(), Some("backing_store_error"));
        assert!(orchestrator.result(id).is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_does_not_retry() {
        let orchestrator = orchestrator(store(5, false), TaskConfig::default());
        let (id, _) = orchestrator
            .submit(TaskRequest::Histogram {
                spec: FilterSpec::default(),
                num_bins: 3,
            })
            .await
            .unwrap();
        let record = wait_terminal(&orchestrator, id).await;
        assert_eq!(record.status, TaskStatus::Failure);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.error_kind.as_deref(), Some("validation_error"));
    }

    #[tokio::test]
    async fn test_export_task_writes_file() {
        let dir = std::env::temp_dir().join(format!("award-export-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("contracts.csv");

        let orchestrator = orchestrator(store(25, false), TaskConfig::default());
        let (id, key) = orchestrator
            .submit(TaskRequest::Export {
                spec: FilterSpec::default(),
                path: path.clone(),
            })
            .await
            .unwrap();
        let record = wait_terminal(&orchestrator, id).await;
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(orchestrator.fetch(key).unwrap()["rows_written"], 25);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 26);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_terminal_tasks() {
        let tasks = TaskConfig {
            result_ttl_secs: 0,
            ..TaskConfig::default()
        };
        let orchestrator = orchestrator(store(3, false), tasks);
        let (id, key) = orchestrator
            .submit(TaskRequest::Aggregate {
                spec: FilterSpec::default(),
            })
            .await
            .unwrap();
        wait_terminal(&orchestrator, id).await;
        // drops the expired registry entry and its cached result
        assert!(orchestrator.sweep_expired() >= 1);
        assert!(orchestrator.status(id).is_none());
        assert!(orchestrator.fetch(key).is_none());
    }
}
