//! Core data types shared across the engine
//!
//! The backing dataset is immutable: one `ContractRecord` per award, plus a
//! precomputed `EntityAggregate` snapshot per dimension used as a fast path
//! for all-time entity listings.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw contract award row
///
/// Produced entirely by the external ETL pipeline and read-only here.
/// Nullable columns stay `Option`: NULL fields never match a non-empty
/// filter and never cause an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    /// Award date; NULL when the source row carried an unparseable date
    pub award_date: Option<NaiveDate>,

    /// Winning contractor name
    pub awardee_name: Option<String>,

    /// Business category of the award
    pub business_category: Option<String>,

    /// Procuring organization
    pub organization_name: Option<String>,

    /// Delivery area
    pub area_of_delivery: Option<String>,

    /// Contract amount; decimal to stay exact at trillion-scale totals
    pub contract_amount: Option<Decimal>,

    /// Title of the award
    pub award_title: String,

    /// Title of the originating notice
    pub notice_title: String,

    /// Contract reference number
    pub contract_number: String,

    /// Precomputed lowercase concatenation of the searchable text columns
    pub search_text: String,
}

/// Precomputed per-entity summary row
///
/// One row per distinct entity value within a dimension. Refreshed
/// out-of-band together with the fact snapshot; scoped to all-time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAggregate {
    /// The entity value (contractor/organization/area/category name)
    pub entity: String,

    /// Number of contracts awarded to this entity
    pub contract_count: u64,

    /// Sum of contract amounts
    pub total_value: Decimal,

    /// Mean contract amount (0 when count is 0)
    pub average_value: Decimal,

    /// Earliest award date seen for this entity
    pub first_contract_date: Option<NaiveDate>,

    /// Latest award date seen for this entity
    pub last_contract_date: Option<NaiveDate>,

    /// Distinct related entity counts in the other dimensions, keyed by
    /// snapshot column name (e.g. `organization_name` -> 12 means this
    /// entity's contracts involved 12 distinct organizations)
    #[serde(default)]
    pub related_counts: BTreeMap<String, u64>,
}

/// Breakdown dimensions supported by the aggregation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Group by winning contractor (`awardee_name`)
    Contractor,
    /// Group by procuring organization (`organization_name`)
    Organization,
    /// Group by delivery area (`area_of_delivery`)
    Area,
    /// Group by business category (`business_category`)
    Category,
}

impl Dimension {
    /// All dimensions, in the order the aggregate response lists them
    pub const ALL: [Dimension; 4] = [
        Dimension::Contractor,
        Dimension::Organization,
        Dimension::Area,
        Dimension::Category,
    ];

    /// Column name in the backing snapshot
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Contractor => "awardee_name",
            Dimension::Organization => "organization_name",
            Dimension::Area => "area_of_delivery",
            Dimension::Category => "business_category",
        }
    }

    /// Extract this dimension's value from a record
    pub fn value_of<'a>(&self, record: &'a ContractRecord) -> Option<&'a str> {
        let v = match self {
            Dimension::Contractor => &record.awardee_name,
            Dimension::Organization => &record.organization_name,
            Dimension::Area => &record.area_of_delivery,
            Dimension::Category => &record.business_category,
        };
        v.as_deref()
    }

    /// Parse a dimension from its request-facing name (`by_contractor` etc.)
    pub fn from_request_name(name: &str) -> Option<Dimension> {
        match name {
            "by_contractor" | "contractor" => Some(Dimension::Contractor),
            "by_organization" | "organization" => Some(Dimension::Organization),
            "by_area" | "area" => Some(Dimension::Area),
            "by_category" | "category" => Some(Dimension::Category),
            _ => None,
        }
    }
}

/// Pagination envelope shared by record and dimension listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Current page, 1-based
    pub page: usize,
    /// Requested page size
    pub page_size: usize,
    /// Total matching rows before pagination
    pub total_count: usize,
    /// Total pages at this page size
    pub total_pages: usize,
    /// Whether a later page exists
    pub has_next: bool,
    /// Whether an earlier page exists
    pub has_previous: bool,
}

impl Pagination {
    /// Build the envelope for one page of `total_count` rows
    pub fn new(page: usize, page_size: usize, total_count: usize) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_count.div_ceil(page_size)
        };
        Self {
            page,
            page_size,
            total_count,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_value_extraction() {
        let record = ContractRecord {
            award_date: None,
            awardee_name: Some("ACME Builders".to_string()),
            business_category: None,
            organization_name: Some("DPWH".to_string()),
            area_of_delivery: None,
            contract_amount: None,
            award_title: "Road Concreting".to_string(),
            notice_title: "Notice".to_string(),
            contract_number: "C-001".to_string(),
            search_text: "road concreting acme builders dpwh".to_string(),
        };

        assert_eq!(
            Dimension::Contractor.value_of(&record),
            Some("ACME Builders")
        );
        assert_eq!(Dimension::Area.value_of(&record), None);
    }

    #[test]
    fn test_dimension_request_names() {
        assert_eq!(
            Dimension::from_request_name("by_contractor"),
            Some(Dimension::Contractor)
        );
        assert_eq!(
            Dimension::from_request_name("area"),
            Some(Dimension::Area)
        );
        assert_eq!(Dimension::from_request_name("by_series"), None);
    }
}
