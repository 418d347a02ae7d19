//! Bulk CSV export
//!
//! Streams a filtered set to delimited text in fixed-size batches. The
//! batch boundary is also the cancellation check and progress report
//! point, so a cancelled export stops within one batch of the request
//! and never buffers the whole result set.

use std::io::Write;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::DimensionRow;
use crate::config::EngineConfig;
use crate::dataset::SharedStore;
use crate::error::{Error, Result};
use crate::query::QueryPlan;
use crate::task::CancelToken;
use crate::types::ContractRecord;

/// Column order of a record export, stable across releases
///
/// Consumers key on these names; reordering or renaming is a breaking
/// change to every downstream spreadsheet.
pub const EXPORT_COLUMNS: [&str; 11] = [
    "reference_id",
    "contract_no",
    "award_title",
    "notice_title",
    "awardee_name",
    "organization_name",
    "area_of_delivery",
    "business_category",
    "contract_amount",
    "award_date",
    "award_status",
];

/// Column order of an aggregated-dimension export
pub const AGGREGATE_EXPORT_COLUMNS: [&str; 4] = ["label", "total_value", "count", "avg_value"];

/// Pre-flight estimate for an export request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEstimate {
    /// Rows the export would emit
    pub rows: usize,
    /// Approximate output size, rows times the calibrated average width
    pub estimated_bytes: usize,
}

/// What a finished export wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Data rows written, excluding the header
    pub rows_written: usize,
}

/// Streaming CSV export over a shared snapshot
pub struct ExportPipeline {
    store: SharedStore,
    config: EngineConfig,
}

impl ExportPipeline {
    /// Create a pipeline over a snapshot
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Estimate an export without producing it
    pub fn estimate(&self, plan: &QueryPlan) -> Result<ExportEstimate> {
        let rows = self.store.count(plan)?;
        Ok(ExportEstimate {
            rows,
            estimated_bytes: rows.saturating_mul(self.config.avg_export_row_bytes),
        })
    }

    /// Stream every matching record to `writer` as CSV
    ///
    /// The header row is always written, even for an empty result set.
    /// Between batches the token is consulted; a cancelled export returns
    /// the cancellation error after flushing what was already written.
    /// `on_progress` receives the cumulative row count after each batch.
    pub fn write_records<W: Write>(
        &self,
        plan: &QueryPlan,
        writer: W,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(usize),
    ) -> Result<ExportSummary> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(EXPORT_COLUMNS)?;

        let batch_rows = self.config.export_batch_rows;
        let mut written = 0usize;
        let mut in_batch = 0usize;
        for record in self.store.scan(plan)? {
            if in_batch == batch_rows {
                csv.flush()?;
                on_progress(written);
                if cancel.is_cancelled() {
                    tracing::info!(rows = written, "Export cancelled mid-stream");
                    return Err(Error::Cancelled);
                }
                in_batch = 0;
            }
            write_record_row(&mut csv, record)?;
            written += 1;
            in_batch += 1;
        }
        csv.flush()?;
        on_progress(written);

        tracing::info!(rows = written, plan = %plan.explain(), "Export complete");
        Ok(ExportSummary {
            rows_written: written,
        })
    }

    /// Write an aggregated-dimension table as CSV
    ///
    /// Small by construction (one row per entity), so no batching; the
    /// header is still always present.
    pub fn write_dimension<W: Write>(
        &self,
        rows: &[DimensionRow],
        writer: W,
    ) -> Result<ExportSummary> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(AGGREGATE_EXPORT_COLUMNS)?;
        for row in rows {
            csv.write_record([
                row.label.as_str(),
                &row.total_value.to_string(),
                &row.count.to_string(),
                &row.avg_value.to_string(),
            ])?;
        }
        csv.flush()?;
        Ok(ExportSummary {
            rows_written: rows.len(),
        })
    }
}

fn write_record_row<W: Write>(csv: &mut csv::Writer<W>, record: &ContractRecord) -> Result<()> {
    let amount = record
        .contract_amount
        .as_ref()
        .map(Decimal::to_string)
        .unwrap_or_default();
    let date = record
        .award_date
        .map(|d| d.to_string())
        .unwrap_or_default();
    csv.write_record([
        record.contract_number.as_str(),
        record.contract_number.as_str(),
        record.award_title.as_str(),
        record.notice_title.as_str(),
        record.awardee_name.as_deref().unwrap_or(""),
        record.organization_name.as_deref().unwrap_or(""),
        record.area_of_delivery.as_deref().unwrap_or(""),
        record.business_category.as_deref().unwrap_or(""),
        amount.as_str(),
        date.as_str(),
        // award status is not carried in the snapshot schema
        "",
    ])?;
    Ok(())
}
