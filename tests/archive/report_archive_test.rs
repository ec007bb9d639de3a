use chrono::NaiveDate;
use tally::archive::{
    ArchiveIds, ArchiveParams, ArchiveSelector, ArchiveStore, ArchiveWriter, RecordData,
    RecordKind, SubtableSelection,
};
use tally::config::StorageSettings;
use tally::period::Period;
use tally::report::{ReportTable, Row, LABEL, OTHERS_LABEL};
use tally::value::Value;

fn day() -> Period {
    Period::day(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
}

fn params() -> ArchiveParams {
    ArchiveParams::new(1, day(), "").with_plugin("Referrers")
}

fn row(label: &str, visits: i64) -> Row {
    Row::from_columns([(LABEL, Value::from(label)), ("nb_visits", Value::from(visits))])
}

/// A root table of `n` referrer types, each with one level of referrer names.
fn referrers_report(n: usize) -> ReportTable {
    let mut report = ReportTable::new();
    for i in 0..n {
        let names = ReportTable::from_rows(vec![
            row(&format!("site-{}.example", i), 2),
            row(&format!("other-{}.example", i), 1),
        ]);
        report.add_row(row(&format!("type {}", i), 3).with_subtable(names));
    }
    report.summary_row = Some(row(OTHERS_LABEL, 4));
    report.set_metadata("period", "day");
    report
}

fn write_report(store: &ArchiveStore, report: &ReportTable) -> i64 {
    let mut writer = ArchiveWriter::new(store, params());
    writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", 42).unwrap();
    writer.insert_report("Referrers_type", report).unwrap();
    writer.finalize_archive().unwrap()
}

#[test]
fn test_report_round_trip() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let report = referrers_report(3);
    write_report(&store, &report);

    let selector = ArchiveSelector::new(&store).with_today(today());
    let loaded = selector
        .load_report(&params(), "Referrers_type")
        .unwrap()
        .unwrap();
    assert_eq!(loaded, report);
    assert_eq!(
        loaded.rows[1].subtable().unwrap().rows[0].label().as_deref(),
        Some("site-1.example")
    );
}

#[test]
fn test_many_subtables_span_chunks() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let report = referrers_report(150);
    let id = write_report(&store, &report);

    let chunks: i64 = store
        .connection()
        .query_row(
            "SELECT count(*) FROM archive_blob_2024_01 WHERE name LIKE 'Referrers_type_chunk_%'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(chunks, 2);

    let selector = ArchiveSelector::new(&store).with_today(today());
    let mut ids = ArchiveIds::new();
    ids.insert((day().start, day().end), vec![id]);

    let all = selector
        .get_archive_data(&ids, &["Referrers_type"], RecordKind::Blob, SubtableSelection::All)
        .unwrap();
    let subtable_ids: Vec<i64> = all.iter().filter_map(|r| r.subtable_id).collect();
    assert_eq!(subtable_ids, (1..=150).collect::<Vec<_>>());
    assert!(all.iter().all(|r| r.name == "Referrers_type"));

    let single = selector
        .get_archive_data(&ids, &["Referrers_type"], RecordKind::Blob, SubtableSelection::Id(120))
        .unwrap();
    assert_eq!(single.len(), 1);
    assert!(matches!(&single[0].data, RecordData::Blob(bytes) if !bytes.is_empty()));

    let loaded = selector
        .load_report(&params(), "Referrers_type")
        .unwrap()
        .unwrap();
    assert_eq!(loaded.len(), 150);
    assert_eq!(loaded, report);
}

#[test]
fn test_missing_report_is_none() {
    let store = ArchiveStore::open_in_memory().unwrap();
    write_report(&store, &referrers_report(1));

    let selector = ArchiveSelector::new(&store).with_today(today());
    assert_eq!(selector.load_report(&params(), "Referrers_name").unwrap(), None);

    let other_site = ArchiveParams::new(2, day(), "").with_plugin("Referrers");
    assert_eq!(selector.load_report(&other_site, "Referrers_type").unwrap(), None);
}

#[test]
fn test_corrupt_blob_is_skipped() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let id = write_report(&store, &referrers_report(2));
    store
        .connection()
        .execute(
            "UPDATE archive_blob_2024_01 SET value = x'00ff' WHERE idarchive = ? AND name = 'Referrers_type'",
            [id],
        )
        .unwrap();

    let selector = ArchiveSelector::new(&store).with_today(today());
    assert_eq!(selector.load_report(&params(), "Referrers_type").unwrap(), None);

    let mut ids = ArchiveIds::new();
    ids.insert((day().start, day().end), vec![id]);
    let numeric = selector
        .get_archive_data(&ids, &["nb_visits"], RecordKind::Numeric, SubtableSelection::None)
        .unwrap();
    assert_eq!(numeric[0].data, RecordData::Numeric(Value::Int(42)));
}

#[test]
fn test_store_on_disk_with_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let settings = StorageSettings {
        path: dir.path().join("archives.db").display().to_string(),
        blob_compression: false,
        table_prefix: "t_".to_string(),
    };
    let report = referrers_report(2);

    {
        let store = ArchiveStore::from_settings(&settings).unwrap();
        write_report(&store, &report);
        assert!(store.table_exists("t_archive_numeric_2024_01").unwrap());
        assert!(store.table_exists("t_archive_blob_2024_01").unwrap());
    }

    let store = ArchiveStore::from_settings(&settings).unwrap();
    let selector = ArchiveSelector::new(&store).with_today(today());
    let found = selector.get_archive_id_and_visits(&params()).unwrap().unwrap();
    assert_eq!(found.visits, 42);
    assert_eq!(
        selector.load_report(&params(), "Referrers_type").unwrap(),
        Some(report)
    );
}
