//! Request surface
//!
//! Wire-shaped request types and the service facade that ties the engines,
//! caches and task pool together. Requests deserialize from the JSON the
//! frontend sends (camelCase dates, `type`-tagged time ranges) and convert
//! into a normalized [`FilterSpec`] before anything executes; every
//! interactive read goes through the result cache with the TTL configured
//! for its operation kind.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{AggregateResult, DimensionRow, SortBy, SortDirection};
use crate::cache::{Fingerprint, ResultCache};
use crate::config::Config;
use crate::dataset::SharedStore;
use crate::error::{Error, Result};
use crate::export::ExportEstimate;
use crate::filter::{FilterSpec, TimeRange, ValueRange};
use crate::histogram::{HistogramResult, DEFAULT_BINS};
use crate::query::{compile, QueryTarget};
use crate::search::{SearchPage, SearchSort};
use crate::task::{
    Engines, TaskEvent, TaskOrchestrator, TaskRecord, TaskRequest,
};
use crate::types::{Dimension, EntityAggregate, Pagination};

// ============================================================================
// Wire Types
// ============================================================================

/// One time range as the frontend sends it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRangeRequest {
    /// `yearly`, `quarterly` or `custom`
    #[serde(rename = "type")]
    pub kind: String,

    /// Calendar year for yearly/quarterly ranges
    #[serde(default)]
    pub year: Option<i32>,

    /// Quarter, 1 through 4, for quarterly ranges
    #[serde(default)]
    pub quarter: Option<u8>,

    /// First day for custom ranges
    #[serde(default, rename = "startDate")]
    pub start_date: Option<NaiveDate>,

    /// Last day for custom ranges
    #[serde(default, rename = "endDate")]
    pub end_date: Option<NaiveDate>,
}

impl TimeRangeRequest {
    fn into_time_range(self, index: usize) -> Result<TimeRange> {
        let field = |name: &str| format!("time_ranges[{}].{}", index, name);
        match self.kind.as_str() {
            "yearly" => Ok(TimeRange::Yearly {
                year: self
                    .year
                    .ok_or_else(|| Error::validation(field("year"), "yearly range needs a year"))?,
            }),
            "quarterly" => Ok(TimeRange::Quarterly {
                year: self.year.ok_or_else(|| {
                    Error::validation(field("year"), "quarterly range needs a year")
                })?,
                quarter: self.quarter.ok_or_else(|| {
                    Error::validation(field("quarter"), "quarterly range needs a quarter")
                })?,
            }),
            "custom" => Ok(TimeRange::Custom {
                start: self.start_date.ok_or_else(|| {
                    Error::validation(field("startDate"), "custom range needs a startDate")
                })?,
                end: self.end_date.ok_or_else(|| {
                    Error::validation(field("endDate"), "custom range needs an endDate")
                })?,
            }),
            other => Err(Error::validation(
                field("type"),
                format!("unknown time range type '{}'", other),
            )),
        }
    }
}

/// Contract-amount bound as the frontend sends it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueRangeRequest {
    /// Minimum amount, inclusive
    #[serde(default)]
    pub min: Option<rust_decimal::Decimal>,
    /// Maximum amount, inclusive
    #[serde(default)]
    pub max: Option<rust_decimal::Decimal>,
}

/// The filter block shared by every operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRequest {
    /// Contractor chips
    #[serde(default)]
    pub contractors: Vec<String>,

    /// Delivery-area chips
    #[serde(default)]
    pub areas: Vec<String>,

    /// Organization chips
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Business-category chips
    #[serde(default)]
    pub business_categories: Vec<String>,

    /// Keyword tokens (`&&` joins an AND-group)
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Time windows, OR'd
    #[serde(default)]
    pub time_ranges: Vec<TimeRangeRequest>,

    /// Optional amount bound
    #[serde(default)]
    pub value_range: Option<ValueRangeRequest>,

    /// Scan the extended dataset partition too
    #[serde(default)]
    pub include_extended: bool,
}

impl FilterRequest {
    /// Validate and convert into a normalized spec
    pub fn into_spec(self) -> Result<FilterSpec> {
        let time_ranges = self
            .time_ranges
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.into_time_range(i))
            .collect::<Result<Vec<_>>>()?;
        FilterSpec {
            contractors: self.contractors,
            areas: self.areas,
            organizations: self.organizations,
            business_categories: self.business_categories,
            keywords: self.keywords,
            time_ranges,
            value_range: self.value_range.map(|r| ValueRange {
                min: r.min,
                max: r.max,
            }),
            include_extended: self.include_extended,
        }
        .normalized()
    }
}

fn default_page() -> usize {
    1
}
fn default_page_size() -> usize {
    20
}
fn default_limit() -> usize {
    10
}

/// Paginated record search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Filter criteria
    #[serde(flatten)]
    pub filter: FilterRequest,

    /// 1-based page
    #[serde(default = "default_page")]
    pub page: usize,

    /// Rows per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Sort key
    #[serde(default)]
    pub sort: SearchSort,

    /// Sort direction
    #[serde(default)]
    pub direction: SortDirection,
}

/// Paginated dimension table request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionRequest {
    /// Filter criteria
    #[serde(flatten)]
    pub filter: FilterRequest,

    /// Dimension name, e.g. `by_contractor` or `area`
    pub dimension: String,

    /// 1-based page
    #[serde(default = "default_page")]
    pub page: usize,

    /// Rows per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Sort key
    #[serde(default)]
    pub sort_by: SortBy,

    /// Sort direction
    #[serde(default)]
    pub sort_direction: SortDirection,
}

/// Amount-distribution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramRequest {
    /// Filter criteria
    #[serde(flatten)]
    pub filter: FilterRequest,

    /// Bucket count; absent means the default
    #[serde(default)]
    pub num_bins: Option<usize>,
}

/// Cross-dimension drill-down request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedRequest {
    /// Dimension the anchor entity belongs to
    pub source_dim: String,

    /// Exact entity value to drill into
    pub source_value: String,

    /// Dimension to list related entities from
    pub target_dim: String,

    /// Most rows to return
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Optional time windows narrowing the drill-down
    #[serde(default)]
    pub time_ranges: Vec<TimeRangeRequest>,
}

/// Distinct values available for building filter chips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Distinct contractor names, sorted
    pub contractors: Vec<String>,
    /// Distinct delivery areas, sorted
    pub areas: Vec<String>,
    /// Distinct organizations, sorted
    pub organizations: Vec<String>,
    /// Distinct business categories, sorted
    pub business_categories: Vec<String>,
    /// Award years present in the dataset, ascending
    pub years: Vec<i32>,
}

// ============================================================================
// Service
// ============================================================================

/// Facade over engines, caches and the task pool
///
/// One instance per loaded snapshot; construct inside a tokio runtime
/// because building it spawns the task workers.
pub struct ExplorerService {
    store: SharedStore,
    engines: Arc<Engines>,
    orchestrator: TaskOrchestrator,
    config: Config,
    aggregate_cache: ResultCache<AggregateResult>,
    dimension_cache: ResultCache<(Vec<DimensionRow>, Pagination)>,
    search_cache: ResultCache<SearchPage>,
    histogram_cache: ResultCache<HistogramResult>,
    listing_cache: ResultCache<FilterOptions>,
}

impl ExplorerService {
    /// Build the service over a loaded snapshot
    pub fn new(store: SharedStore, config: Config) -> Self {
        let engines = Arc::new(Engines::new(store.clone(), &config));
        let orchestrator =
            TaskOrchestrator::new(engines.clone(), config.tasks.clone(), &config.cache);
        Self {
            store,
            engines,
            orchestrator,
            aggregate_cache: ResultCache::new(&config.cache),
            dimension_cache: ResultCache::new(&config.cache),
            search_cache: ResultCache::new(&config.cache),
            histogram_cache: ResultCache::new(&config.cache),
            listing_cache: ResultCache::new(&config.cache),
            config,
        }
    }

    /// Full aggregate response for a filter, cached
    pub fn aggregate(&self, request: FilterRequest) -> Result<AggregateResult> {
        let spec = request.into_spec()?;
        let plan = compile(spec.clone(), QueryTarget::Aggregate)?;
        let key = Fingerprint::compute(&spec, "aggregate", &());
        self.aggregate_cache
            .get_or_compute(key, self.config.cache.aggregate_ttl(), || {
                self.engines.aggregation.aggregate_bounded(&plan)
            })
    }

    /// One sorted page of a dimension table, cached
    pub fn dimension(&self, request: DimensionRequest) -> Result<(Vec<DimensionRow>, Pagination)> {
        let dimension = Dimension::from_request_name(&request.dimension).ok_or_else(|| {
            Error::validation(
                "dimension",
                format!("unknown dimension '{}'", request.dimension),
            )
        })?;
        let spec = request.filter.into_spec()?;
        let plan = compile(spec.clone(), QueryTarget::Aggregate)?;
        let params = (
            dimension,
            request.page,
            request.page_size,
            request.sort_by,
            request.sort_direction,
        );
        let key = Fingerprint::compute(&spec, "dimension", &params);
        self.dimension_cache
            .get_or_compute(key, self.config.cache.aggregate_ttl(), || {
                self.engines.aggregation.dimension_paged(
                    &plan,
                    dimension,
                    request.page,
                    request.page_size,
                    request.sort_by,
                    request.sort_direction,
                )
            })
    }

    /// One page of matching records, cached
    pub fn search(&self, request: SearchRequest) -> Result<SearchPage> {
        let spec = request.filter.into_spec()?;
        let plan = compile(spec.clone(), QueryTarget::Search)?;
        let params = (request.page, request.page_size, request.sort, request.direction);
        let key = Fingerprint::compute(&spec, "search", &params);
        self.search_cache
            .get_or_compute(key, self.config.cache.search_ttl(), || {
                self.engines
                    .search
                    .page(&plan, request.page, request.page_size, request.sort, request.direction)
            })
    }

    /// Amount distribution for a filter, cached
    pub fn histogram(&self, request: HistogramRequest) -> Result<HistogramResult> {
        let num_bins = request.num_bins.unwrap_or(DEFAULT_BINS);
        let spec = request.filter.into_spec()?;
        let plan = compile(spec.clone(), QueryTarget::Histogram)?;
        let key = Fingerprint::compute(&spec, "histogram", &num_bins);
        self.histogram_cache
            .get_or_compute(key, self.config.cache.aggregate_ttl(), || {
                self.engines.histogram.distribution_bounded(&plan, num_bins)
            })
    }

    /// Entities related to one anchor entity through shared contracts
    pub fn related(&self, request: RelatedRequest) -> Result<Vec<EntityAggregate>> {
        let source = Dimension::from_request_name(&request.source_dim).ok_or_else(|| {
            Error::validation(
                "source_dim",
                format!("unknown dimension '{}'", request.source_dim),
            )
        })?;
        let target = Dimension::from_request_name(&request.target_dim).ok_or_else(|| {
            Error::validation(
                "target_dim",
                format!("unknown dimension '{}'", request.target_dim),
            )
        })?;
        let time_ranges = request
            .time_ranges
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.into_time_range(i))
            .collect::<Result<Vec<_>>>()?;
        self.engines.aggregation.related_entities(
            source,
            &request.source_value,
            target,
            request.limit,
            &time_ranges,
        )
    }

    /// Distinct chip values and years, cached with the listing TTL
    pub fn filter_options(&self) -> Result<FilterOptions> {
        let key = Fingerprint::compute(&FilterSpec::default(), "filter_options", &());
        self.listing_cache
            .get_or_compute(key, self.config.cache.listing_ttl(), || {
                Ok(FilterOptions {
                    contractors: self.store.distinct_values(Dimension::Contractor),
                    areas: self.store.distinct_values(Dimension::Area),
                    organizations: self.store.distinct_values(Dimension::Organization),
                    business_categories: self.store.distinct_values(Dimension::Category),
                    years: self.store.available_years(),
                })
            })
    }

    /// Pre-flight size estimate for an export
    pub fn export_estimate(&self, request: FilterRequest) -> Result<ExportEstimate> {
        let spec = request.into_spec()?;
        let plan = compile(spec, QueryTarget::Export)?;
        self.engines.export.estimate(&plan)
    }

    /// Readable plan rendering for a filter, for debugging endpoints
    pub fn explain(&self, request: FilterRequest) -> Result<String> {
        let spec = request.into_spec()?;
        Ok(compile(spec, QueryTarget::Search)?.explain())
    }

    /// Queue a background task; returns its id and result cache key
    pub async fn submit_task(&self, request: TaskRequest) -> Result<(Uuid, Fingerprint)> {
        self.orchestrator.submit(request).await
    }

    /// Current state of a task
    pub fn task_status(&self, id: Uuid) -> Option<TaskRecord> {
        self.orchestrator.status(id)
    }

    /// Stored result of a succeeded task, while its cache entry lives
    pub fn task_result(&self, id: Uuid) -> Option<serde_json::Value> {
        self.orchestrator.result(id)
    }

    /// Stored task result by its cache key
    pub fn task_result_by_key(&self, key: Fingerprint) -> Option<serde_json::Value> {
        self.orchestrator.fetch(key)
    }

    /// Request task cancellation
    pub fn cancel_task(&self, id: Uuid) -> bool {
        self.orchestrator.cancel(id)
    }

    /// Subscribe to task lifecycle events
    pub fn subscribe_tasks(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.orchestrator.subscribe()
    }

    /// Drop expired cache entries and finished tasks past their TTL
    pub fn sweep(&self) -> usize {
        self.aggregate_cache.sweep()
            + self.dimension_cache.sweep()
            + self.search_cache.sweep()
            + self.histogram_cache.sweep()
            + self.listing_cache.sweep()
            + self.orchestrator.sweep_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ContractStore, SnapshotHeader};
    use crate::types::ContractRecord;
    use rust_decimal::Decimal;

    fn service(records: Vec<ContractRecord>) -> ExplorerService {
        let store =
            ContractStore::from_snapshot(SnapshotHeader::current("test"), records, None).unwrap();
        ExplorerService::new(Arc::new(store), Config::default())
    }

    fn record(contractor: &str, area: &str, amount: i64, year: i32) -> ContractRecord {
        ContractRecord {
            award_date: NaiveDate::from_ymd_opt(year, 5, 10),
            awardee_name: Some(contractor.to_string()),
            business_category: Some("Construction".to_string()),
            organization_name: Some("DPWH".to_string()),
            area_of_delivery: Some(area.to_string()),
            contract_amount: Some(Decimal::new(amount, 0)),
            award_title: "Concreting".to_string(),
            notice_title: "Notice".to_string(),
            contract_number: format!("{}-{}", contractor, year),
            search_text: format!("concreting {} {}", contractor.to_lowercase(), area.to_lowercase()),
        }
    }

    #[test]
    fn test_time_range_request_conversion() {
        let yearly = TimeRangeRequest {
            kind: "yearly".to_string(),
            year: Some(2022),
            ..TimeRangeRequest::default()
        };
        assert_eq!(
            yearly.into_time_range(0).unwrap(),
            TimeRange::Yearly { year: 2022 }
        );

        let missing_quarter = TimeRangeRequest {
            kind: "quarterly".to_string(),
            year: Some(2022),
            ..TimeRangeRequest::default()
        };
        let err = missing_quarter.into_time_range(1).unwrap_err();
        assert!(err.to_string().contains("time_ranges[1].quarter"));

        let unknown = TimeRangeRequest {
            kind: "weekly".to_string(),
            ..TimeRangeRequest::default()
        };
        assert!(unknown.into_time_range(0).is_err());
    }

    #[test]
    fn test_custom_range_parses_camel_case_dates() {
        let json = r#"{
            "areas": ["Cagayan"],
            "time_ranges": [
                {"type": "custom", "startDate": "2022-01-01", "endDate": "2022-06-30"}
            ]
        }"#;
        let request: FilterRequest = serde_json::from_str(json).unwrap();
        let spec = request.into_spec().unwrap();
        assert_eq!(
            spec.time_ranges,
            vec![TimeRange::Custom {
                start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2022, 6, 30).unwrap(),
            }]
        );
    }

    #[tokio::test]
    async fn test_aggregate_roundtrip_through_facade() {
        let service = service(vec![
            record("Acme", "Cagayan", 100, 2021),
            record("Zeta", "Isabela", 300, 2022),
        ]);
        let result = service.aggregate(FilterRequest::default()).unwrap();
        assert_eq!(result.summary.count, 2);
        assert_eq!(result.summary.total_value, Decimal::new(400, 0));

        // second call hits the cache; same content either way
        let again = service.aggregate(FilterRequest::default()).unwrap();
        assert_eq!(result, again);
    }

    #[tokio::test]
    async fn test_search_and_aggregate_counts_agree() {
        let service = service(vec![
            record("Acme", "Cagayan", 100, 2021),
            record("Acme", "Cagayan", 200, 2022),
            record("Zeta", "Isabela", 300, 2022),
        ]);
        let filter = FilterRequest {
            areas: vec!["Cagayan".to_string()],
            ..FilterRequest::default()
        };
        let aggregate = service.aggregate(filter.clone()).unwrap();
        let page = service
            .search(SearchRequest {
                filter,
                page: 1,
                page_size: 10,
                sort: SearchSort::AwardDate,
                direction: SortDirection::Desc,
            })
            .unwrap();
        assert_eq!(aggregate.summary.count as usize, page.pagination.total_count);
    }

    #[tokio::test]
    async fn test_dimension_by_request_name() {
        let service = service(vec![record("Acme", "Cagayan", 100, 2021)]);
        let (rows, pagination) = service
            .dimension(DimensionRequest {
                filter: FilterRequest::default(),
                dimension: "by_area".to_string(),
                page: 1,
                page_size: 10,
                sort_by: SortBy::TotalValue,
                sort_direction: SortDirection::Desc,
            })
            .unwrap();
        assert_eq!(pagination.total_count, 1);
        assert_eq!(rows[0].label, "Cagayan");

        let err = service
            .dimension(DimensionRequest {
                filter: FilterRequest::default(),
                dimension: "by_series".to_string(),
                page: 1,
                page_size: 10,
                sort_by: SortBy::TotalValue,
                sort_direction: SortDirection::Desc,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_histogram_defaults_bins() {
        let service = service(
            (0..50)
                .map(|i| record("Acme", "Cagayan", i * 10 + 1, 2021))
                .collect(),
        );
        let result = service
            .histogram(HistogramRequest {
                filter: FilterRequest::default(),
                num_bins: None,
            })
            .unwrap();
        assert_eq!(result.bins.len(), DEFAULT_BINS);
        assert_eq!(result.total_contracts, 50);
    }

    #[tokio::test]
    async fn test_filter_options_listing() {
        let service = service(vec![
            record("Zeta", "Isabela", 300, 2022),
            record("Acme", "Cagayan", 100, 2021),
        ]);
        let options = service.filter_options().unwrap();
        assert_eq!(options.contractors, vec!["Acme", "Zeta"]);
        assert_eq!(options.years, vec![2021, 2022]);
    }

    #[tokio::test]
    async fn test_related_through_facade() {
        let service = service(vec![
            record("Acme", "Cagayan", 100, 2021),
            record("Acme", "Isabela", 500, 2022),
        ]);
        let related = service
            .related(RelatedRequest {
                source_dim: "contractor".to_string(),
                source_value: "Acme".to_string(),
                target_dim: "area".to_string(),
                limit: 10,
                time_ranges: vec![],
            })
            .unwrap();
        assert_eq!(related[0].entity, "Isabela");
    }

    #[tokio::test]
    async fn test_export_estimate_through_facade() {
        let service = service(vec![record("Acme", "Cagayan", 100, 2021)]);
        let estimate = service.export_estimate(FilterRequest::default()).unwrap();
        assert_eq!(estimate.rows, 1);
        assert!(estimate.estimated_bytes > 0);
    }
}
