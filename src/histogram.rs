//! Contract-amount distribution
//!
//! Equal-width binning of the non-NULL amounts in a filtered set. Bin
//! boundaries derive from the observed min and max, so the distribution
//! adapts to the spec instead of assuming a fixed peso range.
//!
//! Memory stays proportional to the bin count, never the row count: one
//! streaming pass finds the spread and a second fills the buckets.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::{check_deadline, safe_avg};
use crate::config::{Deadline, EngineConfig};
use crate::dataset::SharedStore;
use crate::error::{Error, Result};
use crate::query::QueryPlan;

/// Bin count used when the caller does not ask for one
pub const DEFAULT_BINS: usize = 1_000;

/// Fewest bins a request may ask for
pub const MIN_BINS: usize = 10;

/// Most bins a request may ask for
pub const MAX_BINS: usize = 10_000;

/// One histogram bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    /// Position in the distribution, numbered from 1
    pub bin_number: usize,
    /// Lower edge, inclusive
    pub lower: Decimal,
    /// Upper edge; inclusive only for the last bin
    pub upper: Decimal,
    /// Amounts falling in this bucket
    pub count: u64,
    /// Sum of the amounts in this bucket
    pub total_value: Decimal,
    /// Mean amount in this bucket; 0 when the bucket is empty
    pub avg_value: Decimal,
}

/// Distribution of contract amounts over a filtered set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramResult {
    /// Buckets in ascending amount order; empty when nothing matched
    pub bins: Vec<HistogramBin>,
    /// Width shared by every bucket; 0 when the set is empty or every
    /// amount is identical
    pub bin_width: Decimal,
    /// Smallest amount observed
    pub min_value: Option<Decimal>,
    /// Largest amount observed
    pub max_value: Option<Decimal>,
    /// Rows contributing to the distribution (non-NULL amounts only);
    /// always equals the sum of the bin counts
    pub total_contracts: u64,
}

impl HistogramResult {
    fn empty() -> Self {
        Self {
            bins: Vec::new(),
            bin_width: Decimal::ZERO,
            min_value: None,
            max_value: None,
            total_contracts: 0,
        }
    }
}

/// Per-bucket streaming accumulator
#[derive(Clone, Copy, Default)]
struct BinAcc {
    count: u64,
    total: Decimal,
}

/// Histogram engine over a shared snapshot
pub struct HistogramEngine {
    store: SharedStore,
    config: EngineConfig,
}

impl HistogramEngine {
    /// Create an engine over a snapshot
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Bin the filtered set's amounts into `num_bins` equal-width buckets
    ///
    /// Rows with NULL amounts are excluded up front and do not appear in
    /// `total_contracts`. When every amount is identical the result is a
    /// single bucket holding all rows.
    pub fn distribution(&self, plan: &QueryPlan, num_bins: usize) -> Result<HistogramResult> {
        self.distribution_within(plan, num_bins, None)
    }

    /// Interactive variant enforcing the configured row budget and soft
    /// wall-clock timeout
    pub fn distribution_bounded(
        &self,
        plan: &QueryPlan,
        num_bins: usize,
    ) -> Result<HistogramResult> {
        let rows = self.store.count(plan)?;
        let budget = self.config.interactive_row_budget;
        if rows > budget {
            return Err(Error::Capacity { rows, budget });
        }
        self.distribution_within(plan, num_bins, Some(self.config.deadline()))
    }

    fn distribution_within(
        &self,
        plan: &QueryPlan,
        num_bins: usize,
        deadline: Option<Deadline>,
    ) -> Result<HistogramResult> {
        if !(MIN_BINS..=MAX_BINS).contains(&num_bins) {
            return Err(Error::validation(
                "num_bins",
                format!("num_bins {} outside [{}, {}]", num_bins, MIN_BINS, MAX_BINS),
            ));
        }

        // pass 1: spread and contributing-row count
        let mut min: Option<Decimal> = None;
        let mut max: Option<Decimal> = None;
        let mut total_contracts: u64 = 0;
        let mut seen: u64 = 0;
        for record in self.store.scan(plan)? {
            check_deadline(deadline.as_ref(), seen)?;
            seen += 1;
            let Some(amount) = record.contract_amount else {
                continue;
            };
            min = Some(min.map_or(amount, |m| m.min(amount)));
            max = Some(max.map_or(amount, |m| m.max(amount)));
            total_contracts += 1;
        }

        let (Some(min), Some(max)) = (min, max) else {
            return Ok(HistogramResult::empty());
        };

        if min == max {
            // degenerate spread: one bucket carries everything
            return Ok(HistogramResult {
                bins: vec![HistogramBin {
                    bin_number: 1,
                    lower: min,
                    upper: max,
                    count: total_contracts,
                    total_value: min * Decimal::from(total_contracts),
                    avg_value: min,
                }],
                bin_width: Decimal::ZERO,
                min_value: Some(min),
                max_value: Some(max),
                total_contracts,
            });
        }

        // pass 2: fill the buckets; memory is O(num_bins)
        let width = (max - min) / Decimal::from(num_bins as u64);
        let mut accs = vec![BinAcc::default(); num_bins];
        let mut seen: u64 = 0;
        for record in self.store.scan(plan)? {
            check_deadline(deadline.as_ref(), seen)?;
            seen += 1;
            let Some(amount) = record.contract_amount else {
                continue;
            };
            let index = ((amount - min) / width)
                .floor()
                .to_usize()
                .unwrap_or(usize::MAX);
            // the max value lands exactly on the upper edge; clamp it
            // into the last bucket instead of inventing bucket N
            let acc = &mut accs[index.min(num_bins - 1)];
            acc.count += 1;
            acc.total += amount;
        }

        let bins = accs
            .into_iter()
            .enumerate()
            .map(|(i, acc)| HistogramBin {
                bin_number: i + 1,
                lower: min + width * Decimal::from(i as u64),
                upper: if i + 1 == num_bins {
                    max
                } else {
                    min + width * Decimal::from(i as u64 + 1)
                },
                count: acc.count,
                total_value: acc.total,
                avg_value: safe_avg(acc.total, acc.count),
            })
            .collect();

        tracing::debug!(
            rows = total_contracts,
            num_bins,
            %min,
            %max,
            "Histogram computed"
        );
        Ok(HistogramResult {
            bins,
            bin_width: width,
            min_value: Some(min),
            max_value: Some(max),
            total_contracts,
        })
    }
}
