//! Query plans and the compiler
//!
//! `compile` is a pure function of (spec, target): the same spec always
//! yields an identical predicate tree. The plan records which dataset
//! partitions to scan; when the extended partition is requested the scan
//! is the union of both partitions before predicate filtering.

use crate::error::Result;
use crate::filter::{FilterSpec, TimeRange};
use crate::query::predicate::{Column, Predicate};

/// What the caller intends to do with the filtered set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    /// Paginated individual rows
    Search,
    /// Summary, time series and per-dimension breakdowns
    Aggregate,
    /// Value-distribution histogram
    Histogram,
    /// Bulk delimited-text export
    Export,
}

impl QueryTarget {
    /// Stable name used in cache fingerprints and logs
    pub fn name(&self) -> &'static str {
        match self {
            QueryTarget::Search => "search",
            QueryTarget::Aggregate => "aggregate",
            QueryTarget::Histogram => "histogram",
            QueryTarget::Export => "export",
        }
    }
}

/// Executable plan produced by [`compile`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Root of the predicate tree; AND of per-type OR-groups
    pub predicate: Predicate,

    /// Scan the extended partition in addition to the primary one
    pub include_extended: bool,

    /// Execution target
    pub target: QueryTarget,

    /// The entity snapshot may serve single-dimension listings directly:
    /// set when the spec carries no time, keyword, chip or value filters
    pub snapshot_eligible: bool,

    /// The normalized spec the plan was compiled from
    pub spec: FilterSpec,
}

impl QueryPlan {
    /// Readable rendering of the plan for explain output and logs
    pub fn explain(&self) -> String {
        format!(
            "scan[primary{}] target={} where {}",
            if self.include_extended {
                " + extended"
            } else {
                ""
            },
            self.target.name(),
            self.predicate.render()
        )
    }
}

/// Compile a validated spec into an executable plan
///
/// Validation has already happened in [`FilterSpec::normalized`]; this
/// re-runs it so a hand-constructed spec cannot smuggle bad input past
/// the predicate builder. Pure: no side effects beyond the returned plan.
pub fn compile(spec: FilterSpec, target: QueryTarget) -> Result<QueryPlan> {
    let spec = spec.normalized()?;

    let mut groups: Vec<Predicate> = Vec::new();

    if let Some(group) = chip_group(&spec.keywords, None) {
        groups.push(group);
    }
    if let Some(group) = chip_group(&spec.contractors, Some(Column::AwardeeName)) {
        groups.push(group);
    }
    if let Some(group) = chip_group(&spec.areas, Some(Column::AreaOfDelivery)) {
        groups.push(group);
    }
    if let Some(group) = chip_group(&spec.organizations, Some(Column::OrganizationName)) {
        groups.push(group);
    }
    if let Some(group) = chip_group(&spec.business_categories, Some(Column::BusinessCategory)) {
        groups.push(group);
    }
    if let Some(group) = time_group(&spec.time_ranges) {
        groups.push(group);
    }
    if let Some(ref range) = spec.value_range {
        groups.push(Predicate::AmountWithin {
            min: range.min,
            max: range.max,
        });
    }

    let snapshot_eligible = spec.is_unfiltered() && !spec.include_extended;

    Ok(QueryPlan {
        predicate: Predicate::And(groups),
        include_extended: spec.include_extended,
        target,
        snapshot_eligible,
        spec,
    })
}

/// OR-group for one chip list; each chip's `&&` sub-tokens are AND'd
///
/// `column` of `None` targets the search-text blob.
fn chip_group(values: &[String], column: Option<Column>) -> Option<Predicate> {
    let mut alternatives = Vec::new();
    for value in values {
        let sub_tokens = FilterSpec::and_group(value);
        if sub_tokens.is_empty() {
            continue;
        }
        let conjuncts: Vec<Predicate> = sub_tokens
            .into_iter()
            .map(|token| {
                let needle = token.to_lowercase();
                match column {
                    Some(column) => Predicate::Contains { column, needle },
                    None => Predicate::SearchText { needle },
                }
            })
            .collect();
        alternatives.push(if conjuncts.len() == 1 {
            conjuncts.into_iter().next().expect("one conjunct")
        } else {
            Predicate::And(conjuncts)
        });
    }
    match alternatives.len() {
        0 => None,
        1 => Some(alternatives.into_iter().next().expect("one alternative")),
        _ => Some(Predicate::Or(alternatives)),
    }
}

/// OR-group of per-range date predicates, each independently bounded
fn time_group(ranges: &[TimeRange]) -> Option<Predicate> {
    if ranges.is_empty() {
        return None;
    }
    let alternatives: Vec<Predicate> = ranges
        .iter()
        .map(|range| {
            let (start, end) = range.bounds();
            Predicate::DateWithin { start, end }
        })
        .collect();
    Some(if alternatives.len() == 1 {
        alternatives.into_iter().next().expect("one range")
    } else {
        Predicate::Or(alternatives)
    })
}
