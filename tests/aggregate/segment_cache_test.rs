use chrono::NaiveDate;
use rusqlite::Connection;
use tally::aggregate::{
    temp_table_exists, AggregatorOptions, DimensionQuery, LogAggregator, SEGMENT_TABLE_PREFIX,
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
        "INSERT INTO log_visit (idvisit, idsite, visit_last_action_time, visit_total_actions, referer_type, config_browser_name)
         VALUES (1, 1, '2024-01-10 08:00:00', 3, 1, 'FF'),
                (2, 1, '2024-01-10 09:30:00', 1, 1, 'CH'),
                (3, 1, '2024-01-10 12:00:00', 5, 2, 'FF'),
                (4, 1, '2024-01-09 12:00:00', 5, 2, 'FF');
         INSERT INTO log_link_visit_action (idlink_va, idsite, idvisit, server_time, idaction_url)
         VALUES (1, 1, 1, '2024-01-10 08:00:00', 10),
                (2, 1, 2, '2024-01-10 09:30:00', 10),
                (3, 1, 3, '2024-01-10 12:00:00', 11);",
    )
    .unwrap();
    conn
}

fn day() -> Period {
    Period::day(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
}

fn firefox() -> SqlSegment {
    SqlSegment::new(
        "browserCode==FF",
        "log_visit.config_browser_name = ?",
        vec![Value::from("FF")],
    )
    .unwrap()
}

fn total(rows: &[tally::aggregate::LogRow], column: &str) -> i64 {
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_i64))
        .sum()
}

#[test]
fn test_segment_table_created_once_and_reused() {
    let conn = setup();
    let segment = firefox();
    let mut aggregator = LogAggregator::new(&conn, day(), vec![1], &segment);

    let visits = DimensionQuery::new().dimension("referer_type").metrics(["nb_visits"]);
    let built = aggregator.build_visits_query(&visits).unwrap();
    validate_sql(&built.sql).unwrap();

    let tables: Vec<String> = aggregator.segment_tables().map(str::to_string).collect();
    assert_eq!(tables.len(), 1);
    assert!(tables[0].starts_with(SEGMENT_TABLE_PREFIX));
    assert!(built.sql.contains(&format!("FROM {}", tables[0])));
    assert!(temp_table_exists(&conn, &tables[0]).unwrap());

    let rows = aggregator.query_visits_by_dimension(&visits).unwrap();
    assert_eq!(total(&rows, "nb_visits"), 2);

    let actions = DimensionQuery::new().dimension("idaction_url");
    let rows = aggregator.query_actions_by_dimension(&actions).unwrap();
    assert_eq!(total(&rows, "nb_actions"), 2);
    assert_eq!(aggregator.segment_tables().count(), 1);

    aggregator.cleanup().unwrap();
    assert!(!temp_table_exists(&conn, &tables[0]).unwrap());
    assert_eq!(aggregator.segment_tables().count(), 0);
}

#[test]
fn test_literal_fill_matches_insert_select() {
    let conn = setup();
    let segment = firefox();
    let visits = DimensionQuery::new().dimension("referer_type").metrics(["nb_visits"]);

    let mut direct = LogAggregator::new(&conn, day(), vec![1], &segment);
    let expected = direct.query_visits_by_dimension(&visits).unwrap();
    direct.cleanup().unwrap();

    let mut literal = LogAggregator::new(&conn, day(), vec![1], &segment).with_options(
        AggregatorOptions {
            segments_cache: true,
            lower_isolation: false,
        },
    );
    let mut rows = literal.query_visits_by_dimension(&visits).unwrap();
    let mut expected = expected;
    rows.sort_by_key(|r| r.get("referer_type").and_then(Value::as_i64));
    expected.sort_by_key(|r| r.get("referer_type").and_then(Value::as_i64));
    assert_eq!(rows, expected);
    literal.cleanup().unwrap();
}

#[test]
fn test_same_segment_same_table_across_aggregators() {
    let conn = setup();
    let segment = firefox();
    let query = DimensionQuery::new().dimension("referer_type").metrics(["nb_visits"]);

    let mut first = LogAggregator::new(&conn, day(), vec![1], &segment);
    let first_sql = first.build_visits_query(&query).unwrap().sql;
    let mut second = LogAggregator::new(&conn, day(), vec![1], &segment);
    let second_sql = second.build_visits_query(&query).unwrap().sql;

    assert_eq!(first_sql, second_sql);
    let a: Vec<_> = first.segment_tables().collect();
    assert_eq!(a.len(), 1);
    assert_eq!(second.segment_tables().count(), 0);

    let other_day = Period::day(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
    let mut third = LogAggregator::new(&conn, other_day, vec![1], &segment);
    let rows = third.query_visits_by_dimension(&query).unwrap();
    assert_eq!(total(&rows, "nb_visits"), 1);
    assert_ne!(third.segment_tables().next(), a.first().copied());
}

#[test]
fn test_cleanup_keeps_tables_owned_by_other_aggregators() {
    let conn = setup();
    let segment = firefox();
    let query = DimensionQuery::new().dimension("referer_type").metrics(["nb_visits"]);

    let mut first = LogAggregator::new(&conn, day(), vec![1], &segment);
    first.query_visits_by_dimension(&query).unwrap();
    let mut second = LogAggregator::new(&conn, day(), vec![1], &segment);
    second.query_visits_by_dimension(&query).unwrap();
    let table: String = first.segment_tables().next().unwrap().to_string();

    second.cleanup().unwrap();
    assert!(temp_table_exists(&conn, &table).unwrap());
    let rows = first.query_visits_by_dimension(&query).unwrap();
    assert_eq!(total(&rows, "nb_visits"), 2);

    // the creator drops it; the other aggregator recreates and then owns it
    first.cleanup().unwrap();
    assert!(!temp_table_exists(&conn, &table).unwrap());
    let rows = second.query_visits_by_dimension(&query).unwrap();
    assert_eq!(total(&rows, "nb_visits"), 2);
    assert_eq!(second.segment_tables().collect::<Vec<_>>(), vec![table.as_str()]);

    second.cleanup().unwrap();
    assert!(!temp_table_exists(&conn, &table).unwrap());
}
