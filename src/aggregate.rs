//! Aggregation engine
//!
//! Executes compiled plans to produce the summary, time-series and
//! per-dimension breakdowns behind the analytics views, plus sorted,
//! paginated top-N dimension tables and cross-dimension drill-down.
//!
//! All money arithmetic runs on `Decimal` accumulators; at trillion-scale
//! totals an f64 sum drifts by whole pesos. The backing snapshot is
//! immutable, so a single logical pass may issue several physical passes
//! and still observe one consistent filtered set.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{Deadline, EngineConfig};
use crate::dataset::SharedStore;
use crate::error::{Error, Result};
use crate::filter::TimeRange;
use crate::query::QueryPlan;
use crate::types::{Dimension, EntityAggregate, Pagination};

// ============================================================================
// Result Types
// ============================================================================

/// Headline numbers for a filtered set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    /// Matching rows (including rows with NULL amounts)
    pub count: u64,
    /// Sum of non-NULL contract amounts
    pub total_value: Decimal,
    /// Mean contract amount; 0 when nothing matched
    pub avg_value: Decimal,
}

/// One year of the time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearBucket {
    /// Calendar year
    pub year: i32,
    /// Matching rows with a date in this year
    pub count: u64,
    /// Sum of their amounts
    pub total_value: Decimal,
}

/// One month of the time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthBucket {
    /// Calendar year
    pub year: i32,
    /// Month, 1 through 12
    pub month: u32,
    /// Matching rows with a date in this month
    pub count: u64,
    /// Sum of their amounts
    pub total_value: Decimal,
}

/// One row of a per-dimension breakdown table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRow {
    /// The entity value
    pub label: String,
    /// Matching rows carrying this value
    pub count: u64,
    /// Sum of their amounts
    pub total_value: Decimal,
    /// Mean amount; 0 when count is 0
    pub avg_value: Decimal,
}

/// Full aggregate response: summary, time series, four dimension tables
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Headline numbers
    pub summary: Summary,
    /// Per-year series, ascending; rows with NULL dates are excluded
    pub by_year: Vec<YearBucket>,
    /// Per-month series, ascending
    pub by_month: Vec<MonthBucket>,
    /// Top contractors by total value
    pub by_contractor: Vec<DimensionRow>,
    /// Top organizations by total value
    pub by_organization: Vec<DimensionRow>,
    /// Top delivery areas by total value
    pub by_area: Vec<DimensionRow>,
    /// Top business categories by total value
    pub by_category: Vec<DimensionRow>,
}

/// Sort key for paged dimension tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Sort by summed contract value
    #[default]
    TotalValue,
    /// Sort by contract count
    Count,
    /// Sort by mean contract value
    AvgValue,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Largest first (the default everywhere)
    #[default]
    Desc,
    /// Smallest first
    Asc,
}

// ============================================================================
// Engine
// ============================================================================

/// Aggregation engine over a shared snapshot
///
/// Stateless apart from the immutable store handle; safe to call
/// concurrently from any number of tasks.
pub struct AggregationEngine {
    store: SharedStore,
    config: EngineConfig,
}

impl AggregationEngine {
    /// Create an engine over a snapshot
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Compute the full aggregate response for a plan
    ///
    /// One pass over the filtered set fills every accumulator; empty
    /// result sets yield a zero summary and empty arrays, never an error.
    pub fn aggregate(&self, plan: &QueryPlan) -> Result<AggregateResult> {
        self.aggregate_within(plan, None)
    }

    /// Interactive variant of [`aggregate`](Self::aggregate)
    ///
    /// Enforces the configured row budget and soft wall-clock timeout;
    /// callers receiving a capacity or timeout error should resubmit the
    /// same spec as a task.
    pub fn aggregate_bounded(&self, plan: &QueryPlan) -> Result<AggregateResult> {
        self.check_budget(plan)?;
        self.aggregate_within(plan, Some(self.config.deadline()))
    }

    fn aggregate_within(
        &self,
        plan: &QueryPlan,
        deadline: Option<Deadline>,
    ) -> Result<AggregateResult> {
        let mut acc = Accumulators::default();
        for record in self.store.scan(plan)? {
            check_deadline(deadline.as_ref(), acc.count)?;
            acc.push(
                record.award_date,
                record.contract_amount,
                Dimension::ALL.map(|d| d.value_of(record)),
            );
        }
        tracing::debug!(
            rows = acc.count,
            plan = %plan.explain(),
            "Aggregate pass complete"
        );
        Ok(acc.finish(self.config.dimension_top_n))
    }

    /// Sorted, paginated table for a single dimension
    ///
    /// Serves from the precomputed entity snapshot when the plan carries
    /// no filtering; otherwise groups over the filtered fact rows.
    /// Ordering is deterministic: the requested key, then label ascending.
    pub fn dimension_paged(
        &self,
        plan: &QueryPlan,
        dimension: Dimension,
        page: usize,
        page_size: usize,
        sort_by: SortBy,
        sort_direction: SortDirection,
    ) -> Result<(Vec<DimensionRow>, Pagination)> {
        if page == 0 {
            return Err(Error::validation("page", "pages are numbered from 1"));
        }
        if page_size == 0 {
            return Err(Error::validation("page_size", "page_size must be positive"));
        }

        let mut rows: Vec<DimensionRow> = if plan.snapshot_eligible {
            if let Some(snapshot) = self.store.entity_snapshot(dimension) {
                tracing::debug!(dimension = %dimension, "Serving dimension table from entity snapshot");
                snapshot
                    .iter()
                    .map(|agg| DimensionRow {
                        label: agg.entity.clone(),
                        count: agg.contract_count,
                        total_value: agg.total_value,
                        avg_value: agg.average_value,
                    })
                    .collect()
            } else {
                self.group_dimension(plan, dimension)?
            }
        } else {
            self.group_dimension(plan, dimension)?
        };

        sort_rows(&mut rows, sort_by, sort_direction);

        let pagination = Pagination::new(page, page_size, rows.len());
        let start = (page - 1).saturating_mul(page_size).min(rows.len());
        let end = start.saturating_add(page_size).min(rows.len());
        Ok((rows[start..end].to_vec(), pagination))
    }

    /// Cross-dimension drill-down
    ///
    /// Entities of `target` restricted to records whose `source` column
    /// equals `source_value` exactly, sorted by total value descending,
    /// capped at `limit`. An optional time-range set narrows the scan the
    /// same way it would in a compiled plan.
    pub fn related_entities(
        &self,
        source: Dimension,
        source_value: &str,
        target: Dimension,
        limit: usize,
        time_ranges: &[TimeRange],
    ) -> Result<Vec<EntityAggregate>> {
        if source == target {
            return Err(Error::validation(
                "target_dim",
                "target dimension must differ from source dimension",
            ));
        }

        let mut groups: BTreeMap<String, EntityGroup> = BTreeMap::new();
        for record in self.store.partition_iter(false)? {
            if source.value_of(record) != Some(source_value) {
                continue;
            }
            if !time_ranges.is_empty() {
                let in_range = record
                    .award_date
                    .is_some_and(|d| time_ranges.iter().any(|r| r.contains(d)));
                if !in_range {
                    continue;
                }
            }
            let (Some(label), Some(amount)) = (target.value_of(record), record.contract_amount)
            else {
                continue;
            };
            let group = groups.entry(label.to_string()).or_default();
            group.count += 1;
            group.total += amount;
            if let Some(date) = record.award_date {
                group.first = Some(group.first.map_or(date, |f| f.min(date)));
                group.last = Some(group.last.map_or(date, |l| l.max(date)));
            }
            // distinct entities this target entity touches in the other
            // dimensions; the source dimension is pinned to one value
            for dim in Dimension::ALL {
                if dim == target || dim == source {
                    continue;
                }
                if let Some(value) = dim.value_of(record) {
                    group
                        .related
                        .entry(dim)
                        .or_default()
                        .insert(value.to_string());
                }
            }
        }

        let mut rows: Vec<EntityAggregate> = groups
            .into_iter()
            .map(|(entity, g)| EntityAggregate {
                entity,
                contract_count: g.count,
                total_value: g.total,
                average_value: safe_avg(g.total, g.count),
                first_contract_date: g.first,
                last_contract_date: g.last,
                related_counts: g
                    .related
                    .into_iter()
                    .map(|(dim, values)| (dim.column().to_string(), values.len() as u64))
                    .collect(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_value
                .cmp(&a.total_value)
                .then_with(|| a.entity.cmp(&b.entity))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Count matching rows (shared by the search path and capacity checks)
    pub fn count(&self, plan: &QueryPlan) -> Result<usize> {
        self.store.count(plan)
    }

    fn check_budget(&self, plan: &QueryPlan) -> Result<()> {
        // Partition size bounds the filtered set, so an unfiltered check
        // is cheap and exact enough for the budget decision.
        let rows = self.store.count(plan)?;
        let budget = self.config.interactive_row_budget;
        if rows > budget {
            return Err(Error::Capacity { rows, budget });
        }
        Ok(())
    }

    fn group_dimension(&self, plan: &QueryPlan, dimension: Dimension) -> Result<Vec<DimensionRow>> {
        let mut groups: BTreeMap<String, (u64, Decimal)> = BTreeMap::new();
        for record in self.store.scan(plan)? {
            let Some(label) = dimension.value_of(record) else {
                continue;
            };
            let entry = groups.entry(label.to_string()).or_default();
            entry.0 += 1;
            if let Some(amount) = record.contract_amount {
                entry.1 += amount;
            }
        }
        Ok(groups
            .into_iter()
            .map(|(label, (count, total))| DimensionRow {
                label,
                count,
                total_value: total,
                avg_value: safe_avg(total, count),
            })
            .collect())
    }
}

#[derive(Default)]
struct EntityGroup {
    count: u64,
    total: Decimal,
    first: Option<chrono::NaiveDate>,
    last: Option<chrono::NaiveDate>,
    related: BTreeMap<Dimension, BTreeSet<String>>,
}

/// Interval between wall-clock checks during a scan
const DEADLINE_CHECK_ROWS: u64 = 4_096;

/// Consult the deadline every [`DEADLINE_CHECK_ROWS`] rows, and on the
/// first row so a spent budget fails before any work
pub(crate) fn check_deadline(deadline: Option<&Deadline>, rows_seen: u64) -> Result<()> {
    if let Some(deadline) = deadline {
        if rows_seen % DEADLINE_CHECK_ROWS == 0 {
            deadline.check()?;
        }
    }
    Ok(())
}

/// Division guarded against zero count: returns 0, never NaN or infinity
pub(crate) fn safe_avg(total: Decimal, count: u64) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        total / Decimal::from(count)
    }
}

fn sort_rows(rows: &mut [DimensionRow], sort_by: SortBy, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::TotalValue => a.total_value.cmp(&b.total_value),
            SortBy::Count => a.count.cmp(&b.count),
            SortBy::AvgValue => a.avg_value.cmp(&b.avg_value),
        };
        let ordering = match direction {
            SortDirection::Desc => ordering.reverse(),
            SortDirection::Asc => ordering,
        };
        // ties broken by label ascending for determinism
        ordering.then_with(|| a.label.cmp(&b.label))
    });
}

// ============================================================================
// Accumulators
// ============================================================================

/// Single-pass accumulators for the full aggregate response
#[derive(Default)]
struct Accumulators {
    count: u64,
    total: Decimal,
    by_year: BTreeMap<i32, (u64, Decimal)>,
    by_month: BTreeMap<(i32, u32), (u64, Decimal)>,
    dimensions: [BTreeMap<String, (u64, Decimal)>; 4],
}

impl Accumulators {
    fn push(
        &mut self,
        date: Option<chrono::NaiveDate>,
        amount: Option<Decimal>,
        labels: [Option<&str>; 4],
    ) {
        self.count += 1;
        let amount_or_zero = amount.unwrap_or(Decimal::ZERO);
        self.total += amount_or_zero;

        if let Some(date) = date {
            let year = self.by_year.entry(date.year()).or_default();
            year.0 += 1;
            year.1 += amount_or_zero;
            let month = self
                .by_month
                .entry((date.year(), date.month()))
                .or_default();
            month.0 += 1;
            month.1 += amount_or_zero;
        }

        for (map, label) in self.dimensions.iter_mut().zip(labels) {
            if let Some(label) = label {
                let entry = map.entry(label.to_string()).or_default();
                entry.0 += 1;
                entry.1 += amount_or_zero;
            }
        }
    }

    fn finish(self, top_n: usize) -> AggregateResult {
        let summary = Summary {
            count: self.count,
            total_value: self.total,
            avg_value: safe_avg(self.total, self.count),
        };
        let by_year = self
            .by_year
            .into_iter()
            .map(|(year, (count, total_value))| YearBucket {
                year,
                count,
                total_value,
            })
            .collect();
        let by_month = self
            .by_month
            .into_iter()
            .map(|((year, month), (count, total_value))| MonthBucket {
                year,
                month,
                count,
                total_value,
            })
            .collect();

        let [contractor, organization, area, category] =
            self.dimensions.map(|map| top_dimension(map, top_n));
        AggregateResult {
            summary,
            by_year,
            by_month,
            by_contractor: contractor,
            by_organization: organization,
            by_area: area,
            by_category: category,
        }
    }
}

fn top_dimension(map: BTreeMap<String, (u64, Decimal)>, top_n: usize) -> Vec<DimensionRow> {
    let mut rows: Vec<DimensionRow> = map
        .into_iter()
        .map(|(label, (count, total))| DimensionRow {
            label,
            count,
            total_value: total,
            avg_value: safe_avg(total, count),
        })
        .collect();
    sort_rows(&mut rows, SortBy::TotalValue, SortDirection::Desc);
    rows.truncate(top_n);
    rows
}

// ============================================================================
// Tests
// ============================================================================
