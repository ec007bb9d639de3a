//! Side-by-side comparison of a report across segments and periods.
//!
//! Every row gets a comparisons table with one row per requested series.
//! The first series is always the report itself, the others are fetched
//! through a [`ComparisonSource`].

use std::sync::Arc;

use tracing::warn;

use super::derived::{compute_derived_metrics, DerivedMetric};
use super::params::{self, RequestParams};
use super::table::{ReportTable, Row, LABEL};

pub const COMPARE_SEGMENT: &str = "compareSegment";
pub const COMPARE_PERIOD: &str = "comparePeriod";
pub const COMPARE_DATE: &str = "compareDate";

/// Most segments compared in one request, the original included.
pub const MAX_SEGMENT_COMPARISONS: usize = 5;
/// Most periods compared in one request, the original included.
pub const MAX_PERIOD_COMPARISONS: usize = 5;

/// One series of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRequest {
    pub segment: String,
    pub period: String,
    pub date: String,
}

impl ComparisonRequest {
    /// Series requested by `compare=1`, the original series first, then
    /// every period and date pair crossed with every segment.
    pub fn from_params(request: &RequestParams) -> Vec<ComparisonRequest> {
        if !request.get_bool(params::COMPARE, false) {
            return Vec::new();
        }
        let current_segment = request.get(params::SEGMENT).unwrap_or_default().to_string();
        let current_period = request.get(params::PERIOD).unwrap_or_default().to_string();
        let current_date = request.get(params::DATE).unwrap_or_default().to_string();

        let mut segments = vec![current_segment];
        for segment in request.get_all(params::COMPARE_SEGMENTS) {
            if !segments.contains(segment) {
                segments.push(segment.clone());
            }
        }
        if segments.len() > MAX_SEGMENT_COMPARISONS {
            warn!(requested = segments.len(), "too many segment comparisons");
            segments.truncate(MAX_SEGMENT_COMPARISONS);
        }

        let periods = request.get_all(params::COMPARE_PERIODS);
        let dates = request.get_all(params::COMPARE_DATES);
        if periods.len() != dates.len() {
            warn!(
                periods = periods.len(),
                dates = dates.len(),
                "comparePeriods and compareDates differ in length"
            );
        }
        let mut period_dates = vec![(current_period, current_date)];
        period_dates.extend(periods.iter().cloned().zip(dates.iter().cloned()));
        if period_dates.len() > MAX_PERIOD_COMPARISONS {
            warn!(requested = period_dates.len(), "too many period comparisons");
            period_dates.truncate(MAX_PERIOD_COMPARISONS);
        }

        let mut series = Vec::new();
        for (period, date) in &period_dates {
            for segment in &segments {
                series.push(ComparisonRequest {
                    segment: segment.clone(),
                    period: period.clone(),
                    date: date.clone(),
                });
            }
        }
        if series.len() == 1 {
            return Vec::new();
        }
        series
    }
}

/// Fetches the report for another series.
pub trait ComparisonSource {
    fn fetch(&self, series: &ComparisonRequest, request: &RequestParams) -> Option<ReportTable>;
}

/// Attach a comparisons table to every row of `table` and its subtables.
///
/// `series[0]` is the report itself; missing series are compared against
/// empty tables.
pub fn compare(
    table: &mut ReportTable,
    series: &[ComparisonRequest],
    source: &dyn ComparisonSource,
    request: &RequestParams,
    metrics: &[Arc<dyn DerivedMetric>],
) {
    if series.is_empty() {
        return;
    }
    let mut compared: Vec<ReportTable> = Vec::with_capacity(series.len());
    for (index, s) in series.iter().enumerate() {
        let mut other = if index == 0 {
            table.clone()
        } else {
            source.fetch(s, request).unwrap_or_else(|| {
                warn!(
                    segment = %s.segment,
                    period = %s.period,
                    date = %s.date,
                    "no data for comparison series"
                );
                ReportTable::new()
            })
        };
        compute_derived_metrics(&mut other, metrics);
        compared.push(other);
    }

    let mut stack: Vec<(&mut ReportTable, Vec<ReportTable>)> = vec![(table, compared)];
    while let Some((table, compared)) = stack.pop() {
        let ReportTable {
            rows, summary_row, ..
        } = table;
        let entries = rows
            .iter_mut()
            .map(|r| (r, false))
            .chain(summary_row.iter_mut().map(|r| (r, true)));
        for (row, is_summary) in entries {
            let mut comparisons = ReportTable::new();
            let mut child_tables = Vec::with_capacity(series.len());
            for (s, other) in series.iter().zip(&compared) {
                let matched = if is_summary {
                    other.summary_row.as_ref()
                } else {
                    row.label().and_then(|label| other.row_by_label(&label))
                };
                let mut entry = match matched {
                    Some(m) => Row {
                        columns: m.columns.clone(),
                        metadata: m.metadata.clone(),
                        ..Row::default()
                    },
                    None => {
                        let mut empty = Row::new();
                        if let Some(label) = row.column(LABEL) {
                            empty.set_column(LABEL, label.clone());
                        }
                        empty
                    }
                };
                entry.set_metadata(COMPARE_SEGMENT, s.segment.clone());
                entry.set_metadata(COMPARE_PERIOD, s.period.clone());
                entry.set_metadata(COMPARE_DATE, s.date.clone());
                comparisons.add_row(entry);
                child_tables.push(
                    matched
                        .and_then(Row::subtable)
                        .cloned()
                        .unwrap_or_default(),
                );
            }
            row.comparisons = Some(Box::new(comparisons));
            if let Some(sub) = row.subtable.as_deref_mut() {
                stack.push((sub, child_tables));
            }
        }
    }
}
