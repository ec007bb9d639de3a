use chrono::NaiveDate;
use rusqlite::Connection;
use tally::aggregate::{
    AggregatorOptions, DimensionQuery, LimitedRanking, LogAggregator, LogRow, QueryError,
};
use tally::period::Period;
use tally::segment::SqlSegment;
use tally::sql::ddl::log_schema;
use tally::sql::validate_sql;
use tally::value::Value;

fn setup() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    for statement in log_schema("") {
        conn.execute(&statement, []).unwrap();
    }
    conn.execute_batch(
        "INSERT INTO log_visit (idvisit, idsite, idvisitor, visit_last_action_time, visit_total_actions, visit_total_time, referer_type, config_browser_name)
         VALUES (1, 1, 'a', '2024-01-10 08:00:00', 3, 120, 1, 'FF'),
                (2, 1, 'b', '2024-01-10 09:30:00', 1, 10, 1, 'CH'),
                (3, 1, 'c', '2024-01-10 23:59:59', 5, 300, 2, 'FF'),
                (4, 2, 'd', '2024-01-10 10:00:00', 2, 40, 1, 'FF'),
                (5, 1, 'e', '2024-01-11 00:00:00', 2, 40, 1, 'FF');
         INSERT INTO log_link_visit_action (idlink_va, idsite, idvisit, idvisitor, server_time, idaction_url)
         VALUES (1, 1, 1, 'a', '2024-01-10 08:00:00', 10),
                (2, 1, 1, 'a', '2024-01-10 08:01:00', 11),
                (3, 1, 2, 'b', '2024-01-10 09:30:00', 10),
                (4, 1, 3, 'c', '2024-01-10 23:00:00', 10);
         INSERT INTO log_conversion (idvisit, idsite, idgoal, server_time, revenue, referer_type)
         VALUES (1, 1, 1, '2024-01-10 08:02:00', 10.5, 1),
                (3, 1, 1, '2024-01-10 23:10:00', 4.5, 2),
                (3, 1, 2, '2024-01-10 23:11:00', 1.0, 2);",
    )
    .unwrap();
    conn
}

fn day() -> Period {
    Period::day(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
}

fn by(rows: &[LogRow], column: &str, value: i64) -> LogRow {
    rows.iter()
        .find(|r| r.get(column) == Some(&Value::Int(value)))
        .cloned()
        .unwrap_or_else(|| panic!("no row with {} = {}", column, value))
}

#[test]
fn test_visits_by_dimension() {
    let conn = setup();
    let segment = SqlSegment::none();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1], &segment);

    let query = DimensionQuery::new()
        .dimension("referer_type")
        .metrics(["nb_visits", "nb_actions", "sum_visit_length"]);
    let built = aggregator.build_visits_query(&query).unwrap();
    validate_sql(&built.sql).unwrap();
    assert!(built.sql.contains("GROUP BY log_visit.referer_type"));

    let rows = aggregator.query_visits_by_dimension(&query).unwrap();
    assert_eq!(rows.len(), 2);

    let direct = by(&rows, "referer_type", 1);
    assert_eq!(direct.get("nb_visits"), Some(&Value::Int(2)));
    assert_eq!(direct.get("nb_actions"), Some(&Value::Int(4)));
    assert_eq!(direct.get("sum_visit_length"), Some(&Value::Int(130)));

    let search = by(&rows, "referer_type", 2);
    assert_eq!(search.get("nb_visits"), Some(&Value::Int(1)));
}

#[test]
fn test_default_metrics_exclude_fingerprints() {
    let conn = setup();
    let segment = SqlSegment::none();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1, 2], &segment);

    let built = aggregator
        .build_visits_query(&DimensionQuery::new().dimension("referer_type"))
        .unwrap();
    assert!(built.sql.contains("AS `bounce_count`"));
    assert!(!built.sql.contains("nb_uniq_fingerprints"));

    let rows = aggregator
        .query_visits_by_dimension(&DimensionQuery::new().dimension("referer_type"))
        .unwrap();
    let direct = by(&rows, "referer_type", 1);
    assert_eq!(direct.get("nb_visits"), Some(&Value::Int(3)));
    assert_eq!(direct.get("bounce_count"), Some(&Value::Int(1)));
    assert_eq!(direct.get("max_actions"), Some(&Value::Int(3)));
}

#[test]
fn test_actions_join_log_action() {
    let conn = setup();
    let segment = SqlSegment::none();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1], &segment);

    let built = aggregator
        .build_actions_query(
            &DimensionQuery::new()
                .dimension("idaction_url")
                .join_log_action_on("idaction_url"),
        )
        .unwrap();
    assert!(built.sql.contains(
        "LEFT JOIN log_action ON log_link_visit_action.idaction_url = log_action.idaction"
    ));
    validate_sql(&built.sql).unwrap();

    let rows = aggregator
        .query_actions_by_dimension(&DimensionQuery::new().dimension("idaction_url"))
        .unwrap();
    let home = by(&rows, "idaction_url", 10);
    assert_eq!(home.get("nb_actions"), Some(&Value::Int(3)));
    assert_eq!(home.get("nb_visits"), Some(&Value::Int(3)));
}

#[test]
fn test_conversions_grouped_by_goal_first() {
    let conn = setup();
    let segment = SqlSegment::none();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1], &segment);

    let query = DimensionQuery::new()
        .dimension("referer_type")
        .metrics(["nb_conversions", "revenue"]);
    let built = aggregator.build_conversions_query(&query).unwrap();
    assert!(built
        .sql
        .contains("GROUP BY log_conversion.idgoal, log_conversion.referer_type"));

    let rows = aggregator.query_conversions_by_dimension(&query).unwrap();
    assert_eq!(rows.len(), 3);
    let goal_two = by(&rows, "idgoal", 2);
    assert_eq!(goal_two.get("nb_conversions"), Some(&Value::Int(1)));
}

#[test]
fn test_segment_inlined_without_cache() {
    let conn = setup();
    let segment = SqlSegment::new(
        "browserCode==FF",
        "log_visit.config_browser_name = ?",
        vec![Value::from("FF")],
    )
    .unwrap();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1], &segment).with_options(
        AggregatorOptions {
            segments_cache: false,
            lower_isolation: false,
        },
    );

    let visits = DimensionQuery::new().dimension("referer_type").metrics(["nb_visits"]);
    let built = aggregator.build_visits_query(&visits).unwrap();
    assert!(built.sql.contains("AND (log_visit.config_browser_name = ?)"));
    assert_eq!(built.bind.last(), Some(&Value::from("FF")));

    let rows = aggregator.query_visits_by_dimension(&visits).unwrap();
    assert_eq!(by(&rows, "referer_type", 1).get("nb_visits"), Some(&Value::Int(1)));
    assert_eq!(by(&rows, "referer_type", 2).get("nb_visits"), Some(&Value::Int(1)));

    let actions = DimensionQuery::new().dimension("idaction_url");
    let built = aggregator.build_actions_query(&actions).unwrap();
    assert!(built.sql.contains(
        "INNER JOIN log_visit ON log_visit.idvisit = log_link_visit_action.idvisit"
    ));
    validate_sql(&built.sql).unwrap();
    let rows = aggregator.query_actions_by_dimension(&actions).unwrap();
    assert_eq!(by(&rows, "idaction_url", 10).get("nb_actions"), Some(&Value::Int(2)));
    assert_eq!(aggregator.segment_tables().count(), 0);
}

#[test]
fn test_rejects_bad_input() {
    let conn = setup();
    let segment = SqlSegment::none();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1], &segment);

    let err = aggregator
        .build_visits_query(&DimensionQuery::new().metrics(["nb_bogus"]))
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownMetric { .. }));

    let err = aggregator
        .build_visits_query(&DimensionQuery::new().dimension("referer_type; DROP TABLE log_visit"))
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidDimension { .. }));

    let err = aggregator
        .build_ecommerce_items_query("idaction_bogus")
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidDimension { .. }));
}

#[test]
fn test_ranked_visits_fold_others() {
    let conn = setup();
    let segment = SqlSegment::none();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1, 2], &segment);
    let mut ranking = LimitedRanking::new(1, "referer_type");

    let rows = aggregator
        .query_visits_ranked(
            &DimensionQuery::new()
                .dimension("referer_type")
                .metrics(["nb_visits", "max_actions"]),
            &mut ranking,
        )
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("nb_visits"), Some(&Value::Int(3)));
    assert_eq!(rows[1].get("referer_type"), Some(&Value::from("-1")));
    assert_eq!(rows[1].get("nb_visits"), Some(&Value::Int(1)));
    assert_eq!(rows[1].get("max_actions"), Some(&Value::Int(5)));
}
