//! Read-only columnar snapshot
//!
//! The ETL pipeline produces a versioned snapshot: a primary partition of
//! `ContractRecord` rows, an optional extended partition with an identical
//! schema, and per-dimension `EntityAggregate` tables. Loading validates
//! the schema version and column layout and fails loudly on drift; after
//! that the store is immutable and safe to share across threads.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::QueryPlan;
use crate::types::{ContractRecord, Dimension, EntityAggregate};

/// Schema version this engine compiles against
pub const SCHEMA_VERSION: u32 = 3;

/// Column order the snapshot must declare, exactly
pub const SCHEMA_COLUMNS: [&str; 10] = [
    "award_date",
    "awardee_name",
    "business_category",
    "organization_name",
    "area_of_delivery",
    "contract_amount",
    "award_title",
    "notice_title",
    "contract_number",
    "search_text",
];

/// Metadata the ETL pipeline stamps on every snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Schema version of the snapshot
    pub schema_version: u32,

    /// Declared column order
    pub columns: Vec<String>,

    /// Snapshot generation label, e.g. a build timestamp
    pub generation: String,
}

impl SnapshotHeader {
    /// Header matching the current engine schema
    pub fn current(generation: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            columns: SCHEMA_COLUMNS.iter().map(|c| c.to_string()).collect(),
            generation: generation.into(),
        }
    }

    /// Validate against the engine's compiled-in schema
    ///
    /// Any drift fails loudly here instead of silently mismatching columns
    /// at query time.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::Configuration(format!(
                "snapshot schema version {} does not match engine schema version {}",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        if self.columns != SCHEMA_COLUMNS {
            return Err(Error::Configuration(format!(
                "snapshot column layout {:?} does not match engine schema {:?}",
                self.columns, SCHEMA_COLUMNS
            )));
        }
        Ok(())
    }
}

/// Immutable in-memory store of one snapshot generation
///
/// Shared as `Arc<ContractStore>`; every engine call observes the same
/// rows, which is what makes multi-pass aggregation a consistent snapshot.
#[derive(Debug)]
pub struct ContractStore {
    primary: Vec<ContractRecord>,
    extended: Option<Vec<ContractRecord>>,
    entity_snapshots: HashMap<Dimension, Vec<EntityAggregate>>,
    generation: String,
}

impl ContractStore {
    /// Build a store from a validated snapshot
    pub fn from_snapshot(
        header: SnapshotHeader,
        primary: Vec<ContractRecord>,
        extended: Option<Vec<ContractRecord>>,
    ) -> Result<Self> {
        header.validate()?;
        tracing::info!(
            generation = %header.generation,
            primary_rows = primary.len(),
            extended_rows = extended.as_ref().map(Vec::len).unwrap_or(0),
            "Loaded contract snapshot"
        );
        Ok(Self {
            primary,
            extended,
            entity_snapshots: HashMap::new(),
            generation: header.generation,
        })
    }

    /// Attach a precomputed all-time entity table for one dimension
    pub fn with_entity_snapshot(
        mut self,
        dimension: Dimension,
        rows: Vec<EntityAggregate>,
    ) -> Self {
        self.entity_snapshots.insert(dimension, rows);
        self
    }

    /// Snapshot generation label
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Total rows across the partitions a plan would scan
    pub fn partition_rows(&self, include_extended: bool) -> usize {
        let mut rows = self.primary.len();
        if include_extended {
            rows += self.extended.as_ref().map(Vec::len).unwrap_or(0);
        }
        rows
    }

    /// Iterate every record a plan's partitions cover, unfiltered
    ///
    /// Union of primary and (when requested) extended happens before
    /// predicate filtering. Requesting the extended partition when none
    /// was loaded is a backing-store error, not an empty result.
    pub fn partition_iter(
        &self,
        include_extended: bool,
    ) -> Result<impl Iterator<Item = &ContractRecord>> {
        let extended: &[ContractRecord] = if include_extended {
            self.extended
                .as_deref()
                .ok_or_else(|| {
                    Error::BackingStore(
                        "extended partition requested but not present in snapshot".to_string(),
                    )
                })?
        } else {
            &[]
        };
        Ok(self.primary.iter().chain(extended.iter()))
    }

    /// Iterate records matching a plan's predicate
    pub fn scan<'a>(
        &'a self,
        plan: &'a QueryPlan,
    ) -> Result<impl Iterator<Item = &'a ContractRecord>> {
        let iter = self.partition_iter(plan.include_extended)?;
        Ok(iter.filter(move |record| plan.predicate.matches(record)))
    }

    /// Count records matching a plan's predicate
    pub fn count(&self, plan: &QueryPlan) -> Result<usize> {
        Ok(self.scan(plan)?.count())
    }

    /// Precomputed all-time entity table for one dimension, if loaded
    pub fn entity_snapshot(&self, dimension: Dimension) -> Option<&[EntityAggregate]> {
        self.entity_snapshots.get(&dimension).map(Vec::as_slice)
    }

    /// Distinct non-NULL values of one dimension, sorted
    pub fn distinct_values(&self, dimension: Dimension) -> Vec<String> {
        let mut values: BTreeSet<&str> = BTreeSet::new();
        for record in self.primary.iter() {
            if let Some(v) = dimension.value_of(record) {
                if !v.is_empty() {
                    values.insert(v);
                }
            }
        }
        values.into_iter().map(str::to_string).collect()
    }

    /// Distinct award years present in the primary partition, ascending
    pub fn available_years(&self) -> Vec<i32> {
        let mut years: BTreeSet<i32> = BTreeSet::new();
        for record in self.primary.iter() {
            if let Some(date) = record.award_date {
                years.insert(date.year());
            }
        }
        years.into_iter().collect()
    }
}

/// Convenience alias for the shared store handle engines hold
pub type SharedStore = Arc<ContractStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use crate::query::{compile, QueryTarget};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn record(year: i32, area: &str) -> ContractRecord {
        ContractRecord {
            award_date: NaiveDate::from_ymd_opt(year, 6, 15),
            awardee_name: Some("Acme".to_string()),
            business_category: Some("Civil Works".to_string()),
            organization_name: Some("DPWH".to_string()),
            area_of_delivery: Some(area.to_string()),
            contract_amount: Some(Decimal::new(1_000, 0)),
            award_title: "Title".to_string(),
            notice_title: "Notice".to_string(),
            contract_number: format!("C-{}", year),
            search_text: "title notice acme".to_string(),
        }
    }

    #[test]
    fn test_schema_drift_fails_loudly() {
        let mut header = SnapshotHeader::current("test");
        header.schema_version = SCHEMA_VERSION + 1;
        let err = ContractStore::from_snapshot(header, vec![], None).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");

        let mut header = SnapshotHeader::current("test");
        header.columns.swap(0, 1);
        let err = ContractStore::from_snapshot(header, vec![], None).unwrap_err();
        assert!(err.to_string().contains("column layout"));
    }

    #[test]
    fn test_extended_partition_union_before_filtering() {
        let store = ContractStore::from_snapshot(
            SnapshotHeader::current("test"),
            vec![record(2021, "Cagayan")],
            Some(vec![record(2022, "Cagayan"), record(2022, "Isabela")]),
        )
        .unwrap();

        let spec = FilterSpec::builder()
            .area("Cagayan")
            .include_extended(true)
            .build()
            .unwrap();
        let plan = compile(spec, QueryTarget::Search).unwrap();
        assert_eq!(store.count(&plan).unwrap(), 2);

        let spec = FilterSpec::builder().area("Cagayan").build().unwrap();
        let plan = compile(spec, QueryTarget::Search).unwrap();
        assert_eq!(store.count(&plan).unwrap(), 1);
    }

    #[test]
    fn test_missing_extended_partition_is_backing_store_error() {
        let store = ContractStore::from_snapshot(
            SnapshotHeader::current("test"),
            vec![record(2021, "Cagayan")],
            None,
        )
        .unwrap();
        let spec = FilterSpec::builder().include_extended(true).build().unwrap();
        let plan = compile(spec, QueryTarget::Search).unwrap();
        let err = store.count(&plan).unwrap_err();
        assert_eq!(err.kind(), "backing_store_error");
    }

    #[test]
    fn test_distinct_values_and_years() {
        let store = ContractStore::from_snapshot(
            SnapshotHeader::current("test"),
            vec![
                record(2021, "Cagayan"),
                record(2023, "Isabela"),
                record(2021, "Cagayan"),
            ],
            None,
        )
        .unwrap();
        assert_eq!(
            store.distinct_values(Dimension::Area),
            vec!["Cagayan".to_string(), "Isabela".to_string()]
        );
        assert_eq!(store.available_years(), vec![2021, 2023]);
    }
}
