use tally::report::{
    params, ComparisonRequest, ComparisonSource, PostProcessor, ReportMetadata,
    ReportMetadataProvider, ReportRegistry, ReportTable, RequestParams, Row, COMPARE_SEGMENT,
    IS_AGGREGATE, LABEL, TOTALS_LABEL,
};
use tally::value::Value;

fn row(label: &str, visits: i64, bounces: i64) -> Row {
    Row::from_columns([
        (LABEL, Value::from(label)),
        ("nb_visits", Value::from(visits)),
        ("bounce_count", Value::from(bounces)),
    ])
}

fn referrer_types() -> ReportTable {
    ReportTable::from_rows(vec![
        row("website", 5, 5),
        row("search", 30, 3).with_subtable(ReportTable::from_rows(vec![
            row("bing", 10, 1),
            row("google", 20, 2),
        ])),
        row("direct", 7, 0),
    ])
}

fn registry_report(module: &str, action: &str) -> ReportMetadata {
    ReportRegistry::with_core_reports()
        .report(module, action)
        .unwrap()
}

fn labels(table: &ReportTable) -> Vec<String> {
    table.rows.iter().filter_map(Row::label).collect()
}

fn process(metadata: &ReportMetadata, query: &str, table: ReportTable) -> ReportTable {
    PostProcessor::new(metadata, RequestParams::parse(query)).process(table)
}

#[test]
fn test_default_sort_and_totals() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(&metadata, "format_metrics=0", referrer_types());

    assert_eq!(labels(&table), vec!["search", "direct", "website"]);
    let totals = table.totals_row.as_ref().unwrap();
    assert_eq!(totals.label().as_deref(), Some(TOTALS_LABEL));
    assert_eq!(totals.column("nb_visits"), Some(&Value::Int(42)));
    assert!(totals.has_column("bounce_rate"));
    assert!(!totals.has_column("bounce_count"));
}

#[test]
fn test_totals_can_be_disabled() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(&metadata, "totals=0", referrer_types());
    assert!(table.totals_row.is_none());
}

#[test]
fn test_expanded_keeps_sorted_subtables() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(&metadata, "expanded=1&format_metrics=0", referrer_types());

    let search = table.row_by_label("search").unwrap();
    let sub = search.subtable().unwrap();
    assert_eq!(labels(sub), vec!["google", "bing"]);
    assert_eq!(sub.rows[0].column("bounce_rate"), Some(&Value::Float(0.1)));
    assert!(!sub.rows[0].has_column("bounce_count"));
}

#[test]
fn test_flatten_joins_labels() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(&metadata, "flat=1&format_metrics=0", referrer_types());

    assert_eq!(
        labels(&table),
        vec!["search - google", "search - bing", "direct", "website"]
    );
    assert_eq!(
        table.totals_row.as_ref().unwrap().column("nb_visits"),
        Some(&Value::Int(42))
    );
    assert!(table.rows.iter().all(|r| r.subtable.is_none()));
}

#[test]
fn test_flatten_with_aggregate_rows() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(
        &metadata,
        "flat=1&include_aggregate_rows=1&disable_generic_filters=1",
        referrer_types(),
    );

    assert_eq!(
        labels(&table),
        vec!["website", "search", "search - bing", "search - google", "direct"]
    );
    assert_eq!(table.rows[1].metadata(IS_AGGREGATE), Some(&Value::Int(1)));
    assert!(table.rows[2].metadata(IS_AGGREGATE).is_none());
}

#[test]
fn test_flat_on_unflattenable_report_drops_subtables() {
    let metadata = registry_report("UserCountry", "getCountry");
    let input = ReportTable::from_rows(vec![
        row("fr", 3, 1).with_subtable(ReportTable::from_rows(vec![row("paris", 3, 1)])),
        row("de", 4, 0),
    ]);
    let table = process(&metadata, "flat=1&expanded=1", input);

    assert_eq!(labels(&table), vec!["de", "fr"]);
    assert!(table.rows.iter().all(|r| r.subtable.is_none()));
}

#[test]
fn test_label_request_ignores_limit() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(
        &metadata,
        "label=website&filter_limit=1&filter_truncate=1&format_metrics=0",
        referrer_types(),
    );
    assert_eq!(labels(&table), vec!["website"]);
    assert!(table.summary_row.is_none());

    let limited = process(&metadata, "filter_limit=1", referrer_types());
    assert_eq!(labels(&limited), vec!["search"]);
}

#[test]
fn test_label_request_is_never_expanded() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let processor = PostProcessor::new(
        &metadata,
        RequestParams::parse("label=search&expanded=1&format_metrics=0"),
    );
    assert!(!processor.request().contains(params::EXPANDED));

    let table = processor.process(referrer_types());
    assert_eq!(labels(&table), vec!["search"]);
    assert!(table.rows[0].subtable.is_none());
}

#[test]
fn test_hierarchical_and_multiple_labels() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(
        &metadata,
        "label=search%3Egoogle&label=direct&format_metrics=0",
        referrer_types(),
    );
    assert_eq!(labels(&table), vec!["google", "direct"]);
    assert_eq!(table.rows[0].metadata("label_index"), Some(&Value::Int(0)));
    assert_eq!(table.rows[1].metadata("label_index"), Some(&Value::Int(1)));
}

#[test]
fn test_pattern_filter_keeps_totals() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(&metadata, "filter_pattern=^s&format_metrics=0", referrer_types());
    assert_eq!(labels(&table), vec!["search"]);
    assert_eq!(
        table.totals_row.as_ref().unwrap().column("nb_visits"),
        Some(&Value::Int(42))
    );
}

#[test]
fn test_disabled_filters() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let mut input = referrer_types();
    input.rows[0].set_column(LABEL, "my%20site");

    let table = process(&metadata, "disable_generic_filters=1", input.clone());
    assert_eq!(labels(&table), vec!["my site", "search", "direct"]);

    let table = process(&metadata, "disable_queued_filters=1", input);
    assert!(labels(&table).contains(&"my%20site".to_string()));
}

struct FirefoxOnly;

impl ComparisonSource for FirefoxOnly {
    fn fetch(&self, series: &ComparisonRequest, _: &RequestParams) -> Option<ReportTable> {
        (series.segment == "browserCode==FF")
            .then(|| ReportTable::from_rows(vec![row("search", 4, 1)]))
    }
}

#[test]
fn test_comparison_series() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let processor = PostProcessor::new(
        &metadata,
        RequestParams::parse(
            "compare=1&period=day&date=2024-01-10&compareSegments[]=browserCode%3D%3DFF\
             &compareSegments[]=countryCode%3D%3Dfr&format_metrics=0",
        ),
    )
    .with_comparison_source(&FirefoxOnly);
    let table = processor.process(referrer_types());

    let search = table.row_by_label("search").unwrap();
    let compared = search.comparisons.as_ref().unwrap();
    assert_eq!(compared.len(), 3);
    assert_eq!(compared.rows[0].column("nb_visits"), Some(&Value::Int(30)));
    assert_eq!(compared.rows[1].column("nb_visits"), Some(&Value::Int(4)));
    assert_eq!(compared.rows[1].column("bounce_rate"), Some(&Value::Float(0.25)));
    assert!(!compared.rows[1].has_column("bounce_count"));
    assert_eq!(
        compared.rows[2].metadata(COMPARE_SEGMENT),
        Some(&Value::from("countryCode==fr"))
    );
    assert!(!compared.rows[2].has_column("nb_visits"));

    let direct = table.row_by_label("direct").unwrap();
    assert_eq!(direct.comparisons.as_ref().unwrap().rows[1].label().as_deref(), Some("direct"));
}

#[test]
fn test_comparison_without_source_is_skipped() {
    let metadata = registry_report("Referrers", "getReferrerType");
    let table = process(
        &metadata,
        "compare=1&compareSegments[]=browserCode%3D%3DFF",
        referrer_types(),
    );
    assert!(table.rows.iter().all(|r| r.comparisons.is_none()));
}

fn visits_summary() -> ReportTable {
    ReportTable::from_rows(vec![Row::from_columns([
        (LABEL, Value::from("-")),
        ("nb_visits", Value::from(10)),
        ("nb_actions", Value::from(25)),
        ("sum_visit_length", Value::from(3725)),
        ("bounce_count", Value::from(4)),
        ("revenue", Value::from(12)),
    ])])
}

#[test]
fn test_format_modes() {
    let metadata = registry_report("VisitsSummary", "get");

    let raw = process(&metadata, "format_metrics=0", visits_summary());
    let r = &raw.rows[0];
    assert_eq!(r.column("bounce_rate"), Some(&Value::Float(0.4)));
    assert_eq!(r.column("avg_time_on_site"), Some(&Value::Int(373)));

    let bc = process(&metadata, "", visits_summary());
    let r = &bc.rows[0];
    assert_eq!(r.column("bounce_rate"), Some(&Value::from("40%")));
    assert_eq!(r.column("avg_time_on_site"), Some(&Value::Int(373)));
    assert_eq!(r.column("sum_visit_length"), Some(&Value::Int(3725)));

    let typed = process(&metadata, "format_metrics=1", visits_summary());
    let r = &typed.rows[0];
    assert_eq!(r.column("avg_time_on_site"), Some(&Value::from("00:06:13")));
    assert_eq!(r.column("sum_visit_length"), Some(&Value::from("01:02:05")));
    assert_eq!(r.column("nb_actions_per_visit"), Some(&Value::Float(2.5)));
    assert_eq!(r.column("revenue"), Some(&Value::Int(12)));

    let all = process(&metadata, "format_metrics=all", visits_summary());
    assert_eq!(all.rows[0].column("revenue"), Some(&Value::from("$12.00")));
    assert_eq!(
        all.totals_row.as_ref().unwrap().column("revenue"),
        Some(&Value::from("$12.00"))
    );
}

#[test]
fn test_invalid_format_falls_back_to_default() {
    let metadata = registry_report("VisitsSummary", "get");
    let table = process(&metadata, "format_metrics=bogus", visits_summary());
    assert_eq!(table.rows[0].column("bounce_rate"), Some(&Value::from("40%")));
}
