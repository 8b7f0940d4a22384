//! Metric cleaning: completeness filter, null fill, rounding.

use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::{Dataset, Record};
use crate::schema::Metric;

/// Digits kept after the decimal point for every metric.
pub const METRIC_DECIMALS: i32 = 2;

/// Counts produced by [`normalize_numeric`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NumericReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub dropped_missing_year: usize,
    /// Rows whose six metrics were all absent or zero.
    pub dropped_no_metrics: usize,
    /// Metric cells replaced with zero.
    pub cells_filled: usize,
}

/// Round to [`METRIC_DECIMALS`] places. Negative zero comes back as `0.0`.
pub fn round_metric(value: f64) -> f64 {
    let scale = 10f64.powi(METRIC_DECIMALS);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn has_measurement(record: &Record) -> bool {
    Metric::ALL
        .iter()
        .any(|m| record.metric(*m).is_some_and(|v| v != 0.0))
}

fn null_cells(records: &[Record]) -> usize {
    records
        .iter()
        .map(|r| r.metrics.iter().filter(|v| v.is_none()).count())
        .sum()
}

/// Drop rows with no year or no measurement, fill absent metrics with zero,
/// round what remains. Row order is preserved.
pub fn normalize_numeric(dataset: Dataset) -> (Dataset, NumericReport) {
    let Dataset {
        columns,
        mut records,
    } = dataset;

    let mut report = NumericReport {
        rows_in: records.len(),
        ..Default::default()
    };

    let before = records.len();
    records.retain(|r| r.year.is_some());
    report.dropped_missing_year = before - records.len();

    let before = records.len();
    records.retain(has_measurement);
    report.dropped_no_metrics = before - records.len();
    info!(
        missing_year = report.dropped_missing_year,
        no_metrics = report.dropped_no_metrics,
        "rows without year or measurement removed"
    );

    let nulls_before = null_cells(&records);
    for record in &mut records {
        for value in record.metrics.iter_mut() {
            if value.is_none() {
                *value = Some(0.0);
            }
        }
    }
    let nulls_after = null_cells(&records);
    report.cells_filled = nulls_before - nulls_after;
    info!(cells = report.cells_filled, "metric cells filled with 0");
    debug!(nulls_before, nulls_after, "null metric cells");

    for record in &mut records {
        for value in record.metrics.iter_mut().flatten() {
            *value = round_metric(*value);
        }
    }
    info!("metrics rounded to {} decimals", METRIC_DECIMALS);

    report.rows_out = records.len();
    (Dataset::new(columns, records), report)
}
