//! Derived (processed) metrics.
//!
//! A derived metric is computed per row from other columns of the row. The
//! walk over a report tree is an explicit stack of row paths rather than
//! recursion, and every metric can carry context from a parent row into its
//! subtable through [`DerivedMetric::before_subtable`].
//!
//! Computation is idempotent: the root table is flagged with
//! [`PROCESSED_METRICS_COMPUTED`] and rows that already hold a metric
//! column keep their value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

use super::format::MetricFormat;
use super::table::{ReportTable, Row};

/// Table metadata set once every derived metric was computed.
pub const PROCESSED_METRICS_COMPUTED: &str = "processed_metrics_computed";

/// Per-metric state handed from a table to its subtables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricContext {
    values: BTreeMap<String, f64>,
}

impl MetricContext {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }
}

/// A metric computed from other columns of a row.
pub trait DerivedMetric: fmt::Debug + Send + Sync {
    /// Column the metric is written to.
    fn name(&self) -> &str;

    /// Columns the metric reads.
    fn dependencies(&self) -> Vec<String>;

    /// Helper columns the metric introduces that never reach the caller.
    fn temporary_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn format(&self) -> MetricFormat;

    /// Veto computation for a whole report.
    fn before_compute(&self, _table: &ReportTable) -> bool {
        true
    }

    /// Called before the rows of every table, root and subtables alike.
    fn before_table(&self, _table: &ReportTable, _ctx: &mut MetricContext) {}

    /// Value for `row`; `None` leaves the row without the column.
    fn compute(&self, row: &Row, ctx: &MetricContext) -> Option<Value>;

    /// Context for the subtable of `parent`.
    fn before_subtable(&self, _parent: &Row, ctx: &MetricContext) -> MetricContext {
        ctx.clone()
    }

    /// Called once the subtable and everything below it was computed.
    fn after_subtable(&self, _subtable: &ReportTable, _ctx: &MetricContext) {}
}

/// `numerator / denominator`, 0 when the denominator is 0 or missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Ratio {
    name: String,
    numerator: String,
    denominator: String,
    precision: u32,
    format: MetricFormat,
    temporary: Vec<String>,
}

impl Ratio {
    pub fn new(name: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            name: name.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            precision: 2,
            format: MetricFormat::Number(2),
            temporary: Vec::new(),
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_format(mut self, format: MetricFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_temporary_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.temporary = columns.into_iter().map(Into::into).collect();
        self
    }
}

impl DerivedMetric for Ratio {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        vec![self.numerator.clone(), self.denominator.clone()]
    }

    fn temporary_columns(&self) -> Vec<String> {
        self.temporary.clone()
    }

    fn format(&self) -> MetricFormat {
        self.format
    }

    fn compute(&self, row: &Row, _ctx: &MetricContext) -> Option<Value> {
        let numerator = row.column(&self.numerator).and_then(Value::as_f64)?;
        Some(safe_quotient(numerator, row_f64(row, &self.denominator), self.precision))
    }
}

/// Share of a row's value in its parent row's value; at the top level, in
/// the table total.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareOfParent {
    name: String,
    column: String,
    precision: u32,
}

impl ShareOfParent {
    pub fn new(name: &str, column: &str) -> Self {
        Self {
            name: name.to_string(),
            column: column.to_string(),
            precision: 4,
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }
}

const PARENT_VALUE: &str = "parent_value";

impl DerivedMetric for ShareOfParent {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn format(&self) -> MetricFormat {
        MetricFormat::Percent(1)
    }

    fn before_table(&self, table: &ReportTable, ctx: &mut MetricContext) {
        if ctx.get(PARENT_VALUE).is_none() {
            ctx.set(PARENT_VALUE, table.column_total(&self.column));
        }
    }

    fn compute(&self, row: &Row, ctx: &MetricContext) -> Option<Value> {
        let value = row.column(&self.column).and_then(Value::as_f64)?;
        Some(safe_quotient(value, ctx.get(PARENT_VALUE), self.precision))
    }

    fn before_subtable(&self, parent: &Row, _ctx: &MetricContext) -> MetricContext {
        let mut ctx = MetricContext::default();
        ctx.set(PARENT_VALUE, row_f64(parent, &self.column).unwrap_or(0.0));
        ctx
    }
}

fn row_f64(row: &Row, column: &str) -> Option<f64> {
    row.column(column).and_then(Value::as_f64)
}

fn safe_quotient(numerator: f64, denominator: Option<f64>, precision: u32) -> Value {
    match denominator {
        Some(d) if d != 0.0 => Value::Float(numerator / d).round(precision),
        _ => Value::Int(0),
    }
}

/// The metrics every visit-based report exposes.
pub fn core_derived_metrics() -> Vec<Arc<dyn DerivedMetric>> {
    vec![
        Arc::new(
            Ratio::new("nb_actions_per_visit", "nb_actions", "nb_visits")
                .with_precision(1)
                .with_format(MetricFormat::Number(1)),
        ),
        Arc::new(
            Ratio::new("avg_time_on_site", "sum_visit_length", "nb_visits")
                .with_precision(0)
                .with_format(MetricFormat::Duration),
        ),
        Arc::new(
            Ratio::new("bounce_rate", "bounce_count", "nb_visits")
                .with_format(MetricFormat::Percent(0))
                .with_temporary_columns(["bounce_count"]),
        ),
        Arc::new(
            Ratio::new("conversion_rate", "nb_visits_converted", "nb_visits")
                .with_precision(3)
                .with_format(MetricFormat::Percent(1)),
        ),
    ]
}

enum Frame {
    Enter {
        path: Vec<usize>,
        contexts: Vec<MetricContext>,
    },
    Leave {
        path: Vec<usize>,
        contexts: Vec<MetricContext>,
    },
}

/// Compute `metrics` on every row of `table` and its subtables.
///
/// Returns false when the table was already computed.
pub fn compute_derived_metrics(table: &mut ReportTable, metrics: &[Arc<dyn DerivedMetric>]) -> bool {
    if is_computed(table) {
        return false;
    }
    compute_selected(table, metrics);
    table.set_metadata(PROCESSED_METRICS_COMPUTED, 1);
    true
}

/// Compute only the metrics named in `columns`, leaving the table
/// unflagged. Used before filters that sort or match on a derived column.
pub fn compute_derived_columns(
    table: &mut ReportTable,
    metrics: &[Arc<dyn DerivedMetric>],
    columns: &[&str],
) {
    if is_computed(table) {
        return;
    }
    let wanted: Vec<Arc<dyn DerivedMetric>> = metrics
        .iter()
        .filter(|m| columns.contains(&m.name()))
        .cloned()
        .collect();
    if !wanted.is_empty() {
        compute_selected(table, &wanted);
    }
}

pub fn is_computed(table: &ReportTable) -> bool {
    table
        .metadata(PROCESSED_METRICS_COMPUTED)
        .is_some_and(|v| !v.is_zero_like())
}

fn compute_selected(root: &mut ReportTable, metrics: &[Arc<dyn DerivedMetric>]) {
    let active: Vec<&Arc<dyn DerivedMetric>> =
        metrics.iter().filter(|m| m.before_compute(root)).collect();
    if active.is_empty() {
        return;
    }

    if let Some(totals) = root.totals_row.as_mut() {
        let ctx = MetricContext::default();
        for metric in &active {
            set_if_missing(totals, metric.as_ref(), &ctx);
        }
    }

    let mut stack = vec![Frame::Enter {
        path: Vec::new(),
        contexts: vec![MetricContext::default(); active.len()],
    }];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter { path, mut contexts } => {
                let Some(table) = table_at_mut(root, &path) else {
                    continue;
                };
                for (metric, ctx) in active.iter().zip(contexts.iter_mut()) {
                    metric.before_table(table, ctx);
                }

                let mut children = Vec::new();
                for (index, row) in table.rows_with_summary_mut().enumerate() {
                    for (metric, ctx) in active.iter().zip(contexts.iter()) {
                        set_if_missing(row, metric.as_ref(), ctx);
                    }
                    if row.subtable.is_some() {
                        let child_contexts: Vec<MetricContext> = active
                            .iter()
                            .zip(contexts.iter())
                            .map(|(metric, ctx)| metric.before_subtable(row, ctx))
                            .collect();
                        children.push((index, child_contexts));
                    }
                }

                // children are pushed in reverse so they are visited in row order
                for (index, child_contexts) in children.into_iter().rev() {
                    let mut child_path = path.clone();
                    child_path.push(index);
                    stack.push(Frame::Leave {
                        path: child_path.clone(),
                        contexts: child_contexts.clone(),
                    });
                    stack.push(Frame::Enter {
                        path: child_path,
                        contexts: child_contexts,
                    });
                }
            }
            Frame::Leave { path, contexts } => {
                if let Some(table) = table_at_mut(root, &path) {
                    for (metric, ctx) in active.iter().zip(contexts.iter()) {
                        metric.after_subtable(table, ctx);
                    }
                }
            }
        }
    }
}

fn set_if_missing(row: &mut Row, metric: &dyn DerivedMetric, ctx: &MetricContext) {
    if row.has_column(metric.name()) {
        return;
    }
    if let Some(value) = metric.compute(row, ctx) {
        row.set_column(metric.name(), value);
    }
}

/// Table reached by following row indexes from `root`. Index `rows.len()`
/// is the summary row.
fn table_at_mut<'t>(root: &'t mut ReportTable, path: &[usize]) -> Option<&'t mut ReportTable> {
    let mut table = root;
    for &index in path {
        let row = if index < table.rows.len() {
            table.rows.get_mut(index)
        } else {
            table.summary_row.as_mut()
        }?;
        table = row.subtable.as_deref_mut()?;
    }
    Some(table)
}
