//! Typed predicate tree
//!
//! Filters compile to a tagged expression tree instead of ad-hoc query
//! strings: NULL-safety lives in one evaluator and rendering to a readable
//! query form lives in one renderer, so no call site concatenates filter
//! text into anything executable.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt::Write as _;

use crate::types::{ContractRecord, Dimension};

/// Columns a predicate can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Contractor name column
    AwardeeName,
    /// Delivery area column
    AreaOfDelivery,
    /// Procuring organization column
    OrganizationName,
    /// Business category column
    BusinessCategory,
}

impl Column {
    /// Column name as it appears in the backing snapshot
    pub fn name(&self) -> &'static str {
        match self {
            Column::AwardeeName => "awardee_name",
            Column::AreaOfDelivery => "area_of_delivery",
            Column::OrganizationName => "organization_name",
            Column::BusinessCategory => "business_category",
        }
    }

    fn value_of<'a>(&self, record: &'a ContractRecord) -> Option<&'a str> {
        match self {
            Column::AwardeeName => record.awardee_name.as_deref(),
            Column::AreaOfDelivery => record.area_of_delivery.as_deref(),
            Column::OrganizationName => record.organization_name.as_deref(),
            Column::BusinessCategory => record.business_category.as_deref(),
        }
    }
}

impl From<Dimension> for Column {
    fn from(dim: Dimension) -> Self {
        match dim {
            Dimension::Contractor => Column::AwardeeName,
            Dimension::Organization => Column::OrganizationName,
            Dimension::Area => Column::AreaOfDelivery,
            Dimension::Category => Column::BusinessCategory,
        }
    }
}

/// One node of the predicate tree
///
/// Built only by the compiler; leaf needles are stored pre-lowercased so
/// evaluation does one case fold per record column, not per needle.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every child must match; an empty AND matches everything
    And(Vec<Predicate>),

    /// At least one child must match; an empty OR matches nothing
    Or(Vec<Predicate>),

    /// Case-insensitive substring containment against one column.
    /// NULL columns never match.
    Contains {
        /// Column to test
        column: Column,
        /// Lowercased needle
        needle: String,
    },

    /// Case-insensitive containment against the precomputed search-text
    /// blob (already lowercase in the snapshot)
    SearchText {
        /// Lowercased needle
        needle: String,
    },

    /// Award date inside an inclusive span. NULL dates never match.
    DateWithin {
        /// First day, inclusive
        start: NaiveDate,
        /// Last day, inclusive
        end: NaiveDate,
    },

    /// Contract amount inside an optional inclusive bound.
    /// NULL amounts never match.
    AmountWithin {
        /// Lower bound, inclusive
        min: Option<Decimal>,
        /// Upper bound, inclusive
        max: Option<Decimal>,
    },
}

impl Predicate {
    /// Evaluate this predicate against a record
    ///
    /// NULL/empty fields never match a non-empty filter and never error.
    pub fn matches(&self, record: &ContractRecord) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(|p| p.matches(record)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(record)),
            Predicate::Contains { column, needle } => column
                .value_of(record)
                .is_some_and(|v| v.to_lowercase().contains(needle.as_str())),
            Predicate::SearchText { needle } => record.search_text.contains(needle.as_str()),
            Predicate::DateWithin { start, end } => record
                .award_date
                .is_some_and(|d| d >= *start && d <= *end),
            Predicate::AmountWithin { min, max } => record.contract_amount.is_some_and(|amount| {
                min.map_or(true, |m| amount >= m) && max.map_or(true, |m| amount <= m)
            }),
        }
    }

    /// Render the tree to a readable query-language form
    ///
    /// Single renderer for plan explain output and logging; never executed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Predicate::And(children) => render_group(out, children, " AND ", "TRUE"),
            Predicate::Or(children) => render_group(out, children, " OR ", "FALSE"),
            Predicate::Contains { column, needle } => {
                let _ = write!(
                    out,
                    "contains(lower({}), '{}')",
                    column.name(),
                    escape(needle)
                );
            }
            Predicate::SearchText { needle } => {
                let _ = write!(out, "contains(search_text, '{}')", escape(needle));
            }
            Predicate::DateWithin { start, end } => {
                let _ = write!(out, "award_date BETWEEN '{}' AND '{}'", start, end);
            }
            Predicate::AmountWithin { min, max } => match (min, max) {
                (Some(min), Some(max)) => {
                    let _ = write!(out, "contract_amount BETWEEN {} AND {}", min, max);
                }
                (Some(min), None) => {
                    let _ = write!(out, "contract_amount >= {}", min);
                }
                (None, Some(max)) => {
                    let _ = write!(out, "contract_amount <= {}", max);
                }
                (None, None) => out.push_str("TRUE"),
            },
        }
    }
}

fn render_group(out: &mut String, children: &[Predicate], joiner: &str, empty: &str) {
    if children.is_empty() {
        out.push_str(empty);
        return;
    }
    out.push('(');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push_str(joiner);
        }
        child.render_into(out);
    }
    out.push(')');
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}
