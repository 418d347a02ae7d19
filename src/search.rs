//! Paginated record search
//!
//! Serves individual contract rows for a compiled plan. Search shares the
//! predicate path with aggregation, so the total count on a search page
//! always agrees with the summary count for the same spec.

use serde::{Deserialize, Serialize};

use crate::dataset::SharedStore;
use crate::error::{Error, Result};
use crate::query::QueryPlan;
use crate::types::{ContractRecord, Pagination};

use crate::aggregate::SortDirection;

/// Sort key for record pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    /// Most recent awards first by default
    #[default]
    AwardDate,
    /// Largest contracts first by default
    ContractAmount,
}

/// One page of matching records plus its pagination envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    /// Records on this page, in sort order
    pub records: Vec<ContractRecord>,
    /// Page bookkeeping; `total_count` covers the whole filtered set
    pub pagination: Pagination,
}

/// Record search over a shared snapshot
pub struct SearchEngine {
    store: SharedStore,
}

impl SearchEngine {
    /// Create an engine over a snapshot
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// One page of records matching a plan
    ///
    /// Records with a NULL sort key order after every non-NULL value
    /// regardless of direction; ties break on contract number ascending so
    /// page boundaries are stable across identical requests.
    pub fn page(
        &self,
        plan: &QueryPlan,
        page: usize,
        page_size: usize,
        sort: SearchSort,
        direction: SortDirection,
    ) -> Result<SearchPage> {
        if page == 0 {
            return Err(Error::validation("page", "pages are numbered from 1"));
        }
        if page_size == 0 {
            return Err(Error::validation("page_size", "page_size must be positive"));
        }

        let mut matches: Vec<&ContractRecord> = self.store.scan(plan)?.collect();
        sort_records(&mut matches, sort, direction);

        let pagination = Pagination::new(page, page_size, matches.len());
        let start = (page - 1).saturating_mul(page_size).min(matches.len());
        let end = start.saturating_add(page_size).min(matches.len());
        let records = matches[start..end].iter().map(|r| (*r).clone()).collect();

        tracing::debug!(
            total = pagination.total_count,
            page,
            page_size,
            "Search page served"
        );
        Ok(SearchPage {
            records,
            pagination,
        })
    }

    /// Total matching rows for a plan, without materializing a page
    pub fn count(&self, plan: &QueryPlan) -> Result<usize> {
        self.store.count(plan)
    }
}

fn sort_records(records: &mut [&ContractRecord], sort: SearchSort, direction: SortDirection) {
    records.sort_by(|a, b| {
        let ordering = match sort {
            SearchSort::AwardDate => match (a.award_date, b.award_date) {
                (Some(x), Some(y)) => directed(x.cmp(&y), direction),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            },
            SearchSort::ContractAmount => match (a.contract_amount, b.contract_amount) {
                (Some(x), Some(y)) => directed(x.cmp(&y), direction),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            },
        };
        ordering.then_with(|| a.contract_number.cmp(&b.contract_number))
    });
}

fn directed(ordering: std::cmp::Ordering, direction: SortDirection) -> std::cmp::Ordering {
    match direction {
        SortDirection::Desc => ordering.reverse(),
        SortDirection::Asc => ordering,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ContractStore, SnapshotHeader};
    use crate::filter::FilterSpec;
    use crate::query::{compile, QueryTarget};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn record(number: &str, date: Option<(i32, u32, u32)>, amount: Option<i64>) -> ContractRecord {
        ContractRecord {
            award_date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            awardee_name: Some("Acme".to_string()),
            business_category: None,
            organization_name: None,
            area_of_delivery: Some("Cagayan".to_string()),
            contract_amount: amount.map(|a| Decimal::new(a, 0)),
            award_title: "Concreting".to_string(),
            notice_title: "Notice".to_string(),
            contract_number: number.to_string(),
            search_text: "concreting acme cagayan".to_string(),
        }
    }

    fn engine(records: Vec<ContractRecord>) -> SearchEngine {
        let store =
            ContractStore::from_snapshot(SnapshotHeader::current("test"), records, None).unwrap();
        SearchEngine::new(Arc::new(store))
    }

    fn plan() -> QueryPlan {
        compile(FilterSpec::default(), QueryTarget::Search).unwrap()
    }

    #[test]
    fn test_default_order_is_newest_first_nulls_last() {
        let engine = engine(vec![
            record("A", Some((2021, 1, 1)), Some(10)),
            record("B", None, Some(20)),
            record("C", Some((2023, 6, 1)), Some(30)),
        ]);
        let page = engine
            .page(&plan(), 1, 10, SearchSort::AwardDate, SortDirection::Desc)
            .unwrap();
        let order: Vec<&str> = page
            .records
            .iter()
            .map(|r| r.contract_number.as_str())
            .collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_nulls_stay_last_even_ascending() {
        let engine = engine(vec![
            record("A", Some((2021, 1, 1)), None),
            record("B", None, None),
        ]);
        let page = engine
            .page(&plan(), 1, 10, SearchSort::AwardDate, SortDirection::Asc)
            .unwrap();
        assert_eq!(page.records[1].contract_number, "B");
    }

    #[test]
    fn test_amount_sort() {
        let engine = engine(vec![
            record("A", None, Some(10)),
            record("B", None, Some(300)),
            record("C", None, None),
        ]);
        let page = engine
            .page(
                &plan(),
                1,
                10,
                SearchSort::ContractAmount,
                SortDirection::Desc,
            )
            .unwrap();
        let order: Vec<&str> = page
            .records
            .iter()
            .map(|r| r.contract_number.as_str())
            .collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_page_past_end_is_empty_with_correct_envelope() {
        let engine = engine(vec![record("A", None, None)]);
        let page = engine
            .page(&plan(), 5, 10, SearchSort::AwardDate, SortDirection::Desc)
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.pagination.total_count, 1);
        assert_eq!(page.pagination.total_pages, 1);
        assert!(!page.pagination.has_next);
        assert!(page.pagination.has_previous);
    }

    #[test]
    fn test_stable_page_boundaries_on_ties() {
        let records = (0..6).map(|i| record(&format!("N{}", i), Some((2021, 1, 1)), Some(5)));
        let engine = engine(records.collect());
        let first = engine
            .page(&plan(), 1, 3, SearchSort::AwardDate, SortDirection::Desc)
            .unwrap();
        let second = engine
            .page(&plan(), 2, 3, SearchSort::AwardDate, SortDirection::Desc)
            .unwrap();
        let mut seen: Vec<String> = first
            .records
            .iter()
            .chain(second.records.iter())
            .map(|r| r.contract_number.clone())
            .collect();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let engine = engine(vec![]);
        let err = engine
            .page(&plan(), 1, 0, SearchSort::AwardDate, SortDirection::Desc)
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
