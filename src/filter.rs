//! Filter specification
//!
//! A `FilterSpec` is the validated, normalized form of a user's search
//! criteria. Within one filter type values are OR'd; across types the
//! groups are AND'd. A keyword token may carry an AND-group encoded as
//! `&&`-joined sub-strings ("farm && road" matches records whose search
//! text contains both).
//!
//! Construction validates eagerly and the spec is immutable afterwards, so
//! compilation downstream is a pure function of the spec.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inclusive bound on the contract amount column
///
/// Both ends are optional; an absent `ValueRange` means "no restriction"
/// and is never collapsed into a default 0-to-max range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValueRange {
    /// Minimum contract amount, inclusive
    pub min: Option<Decimal>,
    /// Maximum contract amount, inclusive
    pub max: Option<Decimal>,
}

impl ValueRange {
    fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::validation(
                    "value_range.min",
                    format!("min {} exceeds max {}", min, max),
                ));
            }
        }
        Ok(())
    }

    /// Whether neither bound is set, i.e. the range restricts nothing
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// One time window; multiple ranges in a spec are OR'd together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TimeRange {
    /// A whole calendar year
    Yearly {
        /// Calendar year
        year: i32,
    },
    /// One quarter of a calendar year
    Quarterly {
        /// Calendar year
        year: i32,
        /// Quarter, 1 through 4
        quarter: u8,
    },
    /// Arbitrary inclusive date span
    Custom {
        /// First day of the span
        start: NaiveDate,
        /// Last day of the span
        end: NaiveDate,
    },
}

impl TimeRange {
    /// Inclusive first and last day covered by this range
    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        match *self {
            TimeRange::Yearly { year } => (
                NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN),
                NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX),
            ),
            TimeRange::Quarterly { year, quarter } => {
                let start_month = (quarter as u32 - 1) * 3 + 1;
                let end_month = start_month + 2;
                let start = NaiveDate::from_ymd_opt(year, start_month, 1).unwrap_or(NaiveDate::MIN);
                // last day of end_month
                let end = if end_month == 12 {
                    NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX)
                } else {
                    NaiveDate::from_ymd_opt(year, end_month + 1, 1)
                        .and_then(|d| d.pred_opt())
                        .unwrap_or(NaiveDate::MAX)
                };
                (start, end)
            }
            TimeRange::Custom { start, end } => (start, end),
        }
    }

    /// Whether a date falls inside this range
    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            TimeRange::Yearly { year } => date.year() == year,
            TimeRange::Quarterly { year, quarter } => {
                date.year() == year && (date.month0() / 3) as u8 + 1 == quarter
            }
            TimeRange::Custom { start, end } => date >= start && date <= end,
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        match *self {
            TimeRange::Yearly { .. } => Ok(()),
            TimeRange::Quarterly { quarter, .. } => {
                if !(1..=4).contains(&quarter) {
                    return Err(Error::validation(
                        format!("time_ranges[{}].quarter", index),
                        format!("quarter {} outside [1, 4]", quarter),
                    ));
                }
                Ok(())
            }
            TimeRange::Custom { start, end } => {
                if start > end {
                    return Err(Error::validation(
                        format!("time_ranges[{}]", index),
                        format!("startDate {} is after endDate {}", start, end),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Normalized multi-valued search criteria
///
/// Invariant: within a chip list membership is OR; across filter types
/// the groups are AND'd. Built once per request via [`FilterSpec::builder`]
/// or deserialized and passed through [`FilterSpec::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterSpec {
    /// Contractor name chips (substring match against `awardee_name`)
    #[serde(default)]
    pub contractors: Vec<String>,

    /// Delivery area chips (substring match against `area_of_delivery`)
    #[serde(default)]
    pub areas: Vec<String>,

    /// Organization chips (substring match against `organization_name`)
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Business category chips (substring match against `business_category`)
    #[serde(default)]
    pub business_categories: Vec<String>,

    /// Keyword tokens matched against the search-text blob; each token may
    /// be an `&&`-joined AND-group
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Time windows, OR'd together; empty means all-time
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,

    /// Optional contract-amount bound; absent means no restriction
    #[serde(default)]
    pub value_range: Option<ValueRange>,

    /// Include the auxiliary (extended) dataset partition in the scan
    #[serde(default)]
    pub include_extended: bool,
}

impl FilterSpec {
    /// Start building a spec fluently
    pub fn builder() -> FilterSpecBuilder {
        FilterSpecBuilder::default()
    }

    /// Validate and normalize this spec
    ///
    /// Chip lists are trimmed, emptied of blank values, sorted and deduped
    /// so that equivalent requests produce identical specs (and therefore
    /// identical cache fingerprints). Fails with the offending field name
    /// on invalid input; never silently drops a bad value.
    pub fn normalized(mut self) -> Result<FilterSpec> {
        for (index, range) in self.time_ranges.iter().enumerate() {
            range.validate(index)?;
        }
        // a present-but-empty range restricts nothing; fold it into the
        // absent form so downstream paths see one representation
        if self
            .value_range
            .as_ref()
            .is_some_and(ValueRange::is_unbounded)
        {
            self.value_range = None;
        }
        if let Some(ref range) = self.value_range {
            range.validate()?;
        }

        normalize_chips(&mut self.contractors);
        normalize_chips(&mut self.areas);
        normalize_chips(&mut self.organizations);
        normalize_chips(&mut self.business_categories);
        normalize_chips(&mut self.keywords);
        self.time_ranges.dedup();

        Ok(self)
    }

    /// Whether no filter of any type is active
    pub fn is_unfiltered(&self) -> bool {
        self.contractors.is_empty()
            && self.areas.is_empty()
            && self.organizations.is_empty()
            && self.business_categories.is_empty()
            && self.keywords.is_empty()
            && self.time_ranges.is_empty()
            && self.value_range.is_none()
    }

    /// Split a chip value into its `&&`-joined AND-group sub-tokens
    pub fn and_group(value: &str) -> Vec<&str> {
        value
            .split("&&")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Trim, drop blanks, sort and dedupe one chip list in place
fn normalize_chips(values: &mut Vec<String>) {
    for v in values.iter_mut() {
        *v = v.trim().to_string();
    }
    values.retain(|v| !v.is_empty());
    values.sort();
    values.dedup();
}

/// Fluent builder for [`FilterSpec`]
#[derive(Debug, Default)]
pub struct FilterSpecBuilder {
    spec: FilterSpec,
}

impl FilterSpecBuilder {
    /// Add a contractor chip
    pub fn contractor(mut self, value: impl Into<String>) -> Self {
        self.spec.contractors.push(value.into());
        self
    }

    /// Add a delivery-area chip
    pub fn area(mut self, value: impl Into<String>) -> Self {
        self.spec.areas.push(value.into());
        self
    }

    /// Add an organization chip
    pub fn organization(mut self, value: impl Into<String>) -> Self {
        self.spec.organizations.push(value.into());
        self
    }

    /// Add a business-category chip
    pub fn business_category(mut self, value: impl Into<String>) -> Self {
        self.spec.business_categories.push(value.into());
        self
    }

    /// Add a keyword token (may contain `&&` AND-groups)
    pub fn keyword(mut self, value: impl Into<String>) -> Self {
        self.spec.keywords.push(value.into());
        self
    }

    /// Add a time range
    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.spec.time_ranges.push(range);
        self
    }

    /// Set the value range
    pub fn value_range(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.spec.value_range = Some(ValueRange { min, max });
        self
    }

    /// Include the extended dataset partition
    pub fn include_extended(mut self, include: bool) -> Self {
        self.spec.include_extended = include;
        self
    }

    /// Validate and produce the normalized spec
    pub fn build(self) -> Result<FilterSpec> {
        self.spec.normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_sorts_and_dedupes() {
        let spec = FilterSpec::builder()
            .contractor("  Zeta Corp ")
            .contractor("Acme")
            .contractor("Acme")
            .contractor("   ")
            .build()
            .unwrap();
        assert_eq!(spec.contractors, vec!["Acme", "Zeta Corp"]);
    }

    #[test]
    fn test_equivalent_specs_normalize_identically() {
        let a = FilterSpec::builder()
            .area("Cagayan")
            .keyword("concreting")
            .build()
            .unwrap();
        let b = FilterSpec::builder()
            .keyword(" concreting ")
            .area("Cagayan")
            .build()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_quarter_rejected() {
        let err = FilterSpec::builder()
            .time_range(TimeRange::Quarterly {
                year: 2023,
                quarter: 5,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("time_ranges[0].quarter"));
    }

    #[test]
    fn test_inverted_custom_range_rejected() {
        let err = FilterSpec::builder()
            .time_range(TimeRange::Custom {
                start: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            })
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_inverted_value_range_rejected() {
        let err = FilterSpec::builder()
            .value_range(Some(Decimal::new(100, 0)), Some(Decimal::new(50, 0)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("value_range.min"));
    }

    #[test]
    fn test_absent_value_range_is_distinct_from_default() {
        let spec = FilterSpec::builder().build().unwrap();
        assert!(spec.value_range.is_none());
        assert!(spec.is_unfiltered());
    }

    #[test]
    fn test_empty_value_range_folds_to_absent() {
        let spec = FilterSpec::builder()
            .value_range(None, None)
            .build()
            .unwrap();
        assert!(spec.value_range.is_none());
        assert!(spec.is_unfiltered());

        // a one-sided bound still counts as a restriction
        let bounded = FilterSpec::builder()
            .value_range(Some(Decimal::new(1_000, 0)), None)
            .build()
            .unwrap();
        assert_eq!(
            bounded.value_range,
            Some(ValueRange {
                min: Some(Decimal::new(1_000, 0)),
                max: None
            })
        );
    }

    #[test]
    fn test_quarter_bounds() {
        let (start, end) = TimeRange::Quarterly {
            year: 2022,
            quarter: 4,
        }
        .bounds();
        assert_eq!(start, NaiveDate::from_ymd_opt(2022, 10, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2022, 12, 31).unwrap());

        let (start, end) = TimeRange::Quarterly {
            year: 2022,
            quarter: 1,
        }
        .bounds();
        assert_eq!(start, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2022, 3, 31).unwrap());
    }

    #[test]
    fn test_quarter_membership() {
        let q2 = TimeRange::Quarterly {
            year: 2023,
            quarter: 2,
        };
        assert!(q2.contains(NaiveDate::from_ymd_opt(2023, 4, 1).unwrap()));
        assert!(q2.contains(NaiveDate::from_ymd_opt(2023, 6, 30).unwrap()));
        assert!(!q2.contains(NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()));
        assert!(!q2.contains(NaiveDate::from_ymd_opt(2022, 5, 1).unwrap()));
    }

    #[test]
    fn test_and_group_split() {
        assert_eq!(
            FilterSpec::and_group("farm && road"),
            vec!["farm", "road"]
        );
        assert_eq!(FilterSpec::and_group("bridge"), vec!["bridge"]);
        assert_eq!(FilterSpec::and_group(" && "), Vec::<&str>::new());
    }

    #[test]
    fn test_time_range_json_shape() {
        let json = r#"{"type":"quarterly","year":2021,"quarter":3}"#;
        let range: TimeRange = serde_json::from_str(json).unwrap();
        assert_eq!(
            range,
            TimeRange::Quarterly {
                year: 2021,
                quarter: 3
            }
        );
    }
}
