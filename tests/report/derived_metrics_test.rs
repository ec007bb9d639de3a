use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tally::report::{
    compute_derived_columns, compute_derived_metrics, core_derived_metrics, is_computed,
    DerivedMetric, MetricContext, MetricFormat, ReportTable, Row, ShareOfParent, LABEL,
};
use tally::value::Value;

fn row(label: &str, visits: i64, actions: i64) -> Row {
    Row::from_columns([
        (LABEL, Value::from(label)),
        ("nb_visits", Value::from(visits)),
        ("nb_actions", Value::from(actions)),
        ("bounce_count", Value::from(1)),
    ])
}

fn tree() -> ReportTable {
    let mut table = ReportTable::from_rows(vec![
        row("search", 8, 20).with_subtable(ReportTable::from_rows(vec![
            row("google", 6, 18),
            row("bing", 2, 2),
        ])),
        row("direct", 2, 2),
    ]);
    table.summary_row = Some(row("-1", 0, 0));
    table
}

fn column_count(row: &Row, name: &str) -> usize {
    row.column_names().filter(|c| *c == name).count()
}

#[test]
fn test_compute_twice_is_idempotent() {
    let metrics = core_derived_metrics();
    let mut table = tree();

    assert!(compute_derived_metrics(&mut table, &metrics));
    assert!(is_computed(&table));
    let first = table.clone();

    assert!(!compute_derived_metrics(&mut table, &metrics));
    assert_eq!(table, first);
    assert_eq!(column_count(&table.rows[0], "nb_actions_per_visit"), 1);
    assert_eq!(table.rows[0].column("nb_actions_per_visit"), Some(&Value::Float(2.5)));

    let google = &table.rows[0].subtable().unwrap().rows[0];
    assert_eq!(google.column("nb_actions_per_visit"), Some(&Value::Float(3.0)));

    let summary = table.summary_row.as_ref().unwrap();
    assert_eq!(summary.column("bounce_rate"), Some(&Value::Int(0)));
}

#[test]
fn test_existing_columns_are_kept() {
    let metrics = core_derived_metrics();
    let mut table = tree();
    table.rows[1].set_column("bounce_rate", 0.99);
    compute_derived_metrics(&mut table, &metrics);
    assert_eq!(table.rows[1].column("bounce_rate"), Some(&Value::Float(0.99)));
    assert_eq!(column_count(&table.rows[1], "bounce_rate"), 1);
}

#[test]
fn test_partial_compute_then_full() {
    let metrics = core_derived_metrics();
    let mut table = tree();
    compute_derived_columns(&mut table, &metrics, &["bounce_rate"]);
    assert!(!is_computed(&table));
    assert!(table.rows[0].has_column("bounce_rate"));
    assert!(!table.rows[0].has_column("nb_actions_per_visit"));

    compute_derived_metrics(&mut table, &metrics);
    assert!(table.rows[0].has_column("nb_actions_per_visit"));
    assert_eq!(column_count(&table.rows[0], "bounce_rate"), 1);
}

#[test]
fn test_share_of_parent() {
    let metrics: Vec<Arc<dyn DerivedMetric>> =
        vec![Arc::new(ShareOfParent::new("visits_share", "nb_visits").with_precision(2))];
    let mut table = tree();
    compute_derived_metrics(&mut table, &metrics);

    assert_eq!(table.rows[0].column("visits_share"), Some(&Value::Float(0.8)));
    assert_eq!(table.rows[1].column("visits_share"), Some(&Value::Float(0.2)));
    let sub = table.rows[0].subtable().unwrap();
    assert_eq!(sub.rows[0].column("visits_share"), Some(&Value::Float(0.75)));
    assert_eq!(sub.rows[1].column("visits_share"), Some(&Value::Float(0.25)));
}

#[derive(Debug)]
struct Vetoed;

impl DerivedMetric for Vetoed {
    fn name(&self) -> &str {
        "never"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["nb_visits".to_string()]
    }

    fn format(&self) -> MetricFormat {
        MetricFormat::Number(0)
    }

    fn before_compute(&self, _table: &ReportTable) -> bool {
        false
    }

    fn compute(&self, _row: &Row, _ctx: &MetricContext) -> Option<Value> {
        Some(Value::Int(1))
    }
}

#[test]
fn test_vetoed_metric_is_not_computed() {
    let mut metrics = core_derived_metrics();
    metrics.push(Arc::new(Vetoed));
    let mut table = tree();
    compute_derived_metrics(&mut table, &metrics);

    assert!(is_computed(&table));
    assert!(table.rows.iter().all(|r| !r.has_column("never")));
    assert!(table.rows.iter().all(|r| r.has_column("bounce_rate")));
}

/// Depth of the table a row sits in, counting completed subtables.
#[derive(Debug, Default)]
struct Depth {
    finished: AtomicUsize,
}

impl DerivedMetric for Depth {
    fn name(&self) -> &str {
        "depth"
    }

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn format(&self) -> MetricFormat {
        MetricFormat::Number(0)
    }

    fn compute(&self, _row: &Row, ctx: &MetricContext) -> Option<Value> {
        Some(Value::Int(ctx.get("depth").unwrap_or(0.0) as i64))
    }

    fn before_subtable(&self, _parent: &Row, ctx: &MetricContext) -> MetricContext {
        let mut child = ctx.clone();
        child.set("depth", ctx.get("depth").unwrap_or(0.0) + 1.0);
        child
    }

    fn after_subtable(&self, _subtable: &ReportTable, _ctx: &MetricContext) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_context_flows_into_subtables() {
    let depth = Arc::new(Depth::default());
    let metrics: Vec<Arc<dyn DerivedMetric>> = vec![depth.clone()];
    let mut table = tree();
    table.rows[0].subtable_mut().unwrap().rows[0].subtable =
        Some(Box::new(ReportTable::from_rows(vec![row("keyword", 6, 18)])));
    compute_derived_metrics(&mut table, &metrics);

    assert_eq!(table.rows[0].column("depth"), Some(&Value::Int(0)));
    let sub = table.rows[0].subtable().unwrap();
    assert_eq!(sub.rows[1].column("depth"), Some(&Value::Int(1)));
    let keywords = sub.rows[0].subtable().unwrap();
    assert_eq!(keywords.rows[0].column("depth"), Some(&Value::Int(2)));
    assert_eq!(depth.finished.load(Ordering::SeqCst), 2);
}
