use chrono::NaiveDate;
use std::collections::BTreeMap;

use tally::archive::{
    ArchiveIds, ArchiveParams, ArchiveSelector, ArchiveStatus, ArchiveStore, ArchiveWriter,
    BlobRecord, RecordData, RecordKind, SubtableSelection, MAX_SPOOL_SIZE,
};
use tally::period::Period;
use tally::value::Value;

fn day() -> Period {
    Period::day(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
}

fn params() -> ArchiveParams {
    ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary")
}

fn ids_for(id: i64) -> ArchiveIds {
    let mut ids = ArchiveIds::new();
    ids.insert((day().start, day().end), vec![id]);
    ids
}

fn flag_value(store: &ArchiveStore, id: i64, flag: &str) -> i64 {
    store
        .connection()
        .query_row(
            "SELECT value FROM archive_numeric_2024_01 WHERE idarchive = ? AND name = ?",
            rusqlite::params![id, flag],
            |r| r.get(0),
        )
        .unwrap()
}

fn row_count(store: &ArchiveStore, table: &str, id: i64) -> i64 {
    store
        .connection()
        .query_row(
            &format!("SELECT count(*) FROM {} WHERE idarchive = ?", table),
            [id],
            |r| r.get(0),
        )
        .unwrap()
}

#[test]
fn test_zero_like_values_are_not_stored() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let mut writer = ArchiveWriter::new(&store, params());
    let id = writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", 42).unwrap();
    writer.insert_record("nb_actions", 0).unwrap();
    writer.insert_record("bounce_count", 0.0).unwrap();
    writer.insert_record("nb_uniq_visitors", "0").unwrap();
    writer.insert_record("max_actions", "").unwrap();
    writer.insert_record("sum_visit_length", Value::Null).unwrap();
    writer.finalize_archive().unwrap();

    // flag + nb_visits
    assert_eq!(row_count(&store, "archive_numeric_2024_01", id), 2);
    assert_eq!(row_count(&store, "archive_blob_2024_01", id), 0);

    let selector = ArchiveSelector::new(&store).with_today(today());
    let rows = selector
        .get_archive_data(
            &ids_for(id),
            &["nb_visits", "nb_actions", "bounce_count"],
            RecordKind::Numeric,
            SubtableSelection::None,
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "nb_visits");
    assert_eq!(rows[0].data, RecordData::Numeric(Value::Int(42)));
}

#[test]
fn test_archive_not_selectable_before_finalize() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let selector = ArchiveSelector::new(&store).with_today(today());

    let mut writer = ArchiveWriter::new(&store, params());
    let id = writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", 42).unwrap();
    writer.flush_spools().unwrap();

    assert_eq!(flag_value(&store, id, "VisitsSummary_done"), ArchiveStatus::Error.value());
    assert_eq!(selector.get_archive_id_and_visits(&params()).unwrap(), None);

    writer.finalize_archive().unwrap();
    assert_eq!(flag_value(&store, id, "VisitsSummary_done"), ArchiveStatus::Ok.value());
    let found = selector.get_archive_id_and_visits(&params()).unwrap().unwrap();
    assert_eq!(found.id_archive, id);
    assert_eq!(found.visits, 42);
}

#[test]
fn test_dropped_writer_leaves_error_flag() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let id = {
        let mut writer = ArchiveWriter::new(&store, params());
        let id = writer.init_new_archive().unwrap();
        writer.insert_record("nb_visits", 7).unwrap();
        id
    };

    assert_eq!(flag_value(&store, id, "VisitsSummary_done"), ArchiveStatus::Error.value());
    // unflushed records are lost with the writer
    assert_eq!(row_count(&store, "archive_numeric_2024_01", id), 1);
    let selector = ArchiveSelector::new(&store).with_today(today());
    assert_eq!(selector.get_archive_id_and_visits(&params()).unwrap(), None);
}

#[test]
fn test_spools_flush_in_batches() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let mut writer = ArchiveWriter::new(&store, params());
    let id = writer.init_new_archive().unwrap();

    let total = MAX_SPOOL_SIZE * 2 + 3;
    for i in 0..total {
        writer.insert_record(&format!("metric_{}", i), i as i64 + 1).unwrap();
        writer
            .insert_record(&format!("text_{}", i), format!("value {}", i))
            .unwrap();
    }
    assert_eq!(
        row_count(&store, "archive_numeric_2024_01", id),
        (MAX_SPOOL_SIZE * 2) as i64 + 1
    );
    assert_eq!(
        row_count(&store, "archive_blob_2024_01", id),
        (MAX_SPOOL_SIZE * 2) as i64
    );

    writer.finalize_archive().unwrap();
    assert_eq!(
        row_count(&store, "archive_numeric_2024_01", id),
        total as i64 + 1
    );
    assert_eq!(row_count(&store, "archive_blob_2024_01", id), total as i64);

    let selector = ArchiveSelector::new(&store).with_today(today());
    let rows = selector
        .get_archive_data(&ids_for(id), &["text_7"], RecordKind::Blob, SubtableSelection::None)
        .unwrap();
    assert_eq!(rows[0].data, RecordData::Blob(b"value 7".to_vec()));
}

#[test]
fn test_duplicate_record_name_keeps_last_value() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let mut writer = ArchiveWriter::new(&store, params());
    let id = writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", 1).unwrap();
    writer.flush_spools().unwrap();
    writer.insert_record("nb_visits", 2).unwrap();
    writer.finalize_archive().unwrap();

    assert_eq!(flag_value(&store, id, "nb_visits"), 2);
}

#[test]
fn test_ids_allocated_per_shard() {
    let store = ArchiveStore::open_in_memory().unwrap();

    let mut first = ArchiveWriter::new(&store, params());
    let a = first.init_new_archive().unwrap();
    first.finalize_archive().unwrap();

    let mut second = ArchiveWriter::new(&store, params());
    let b = second.init_new_archive().unwrap();
    second.finalize_archive().unwrap();
    assert_eq!(b, a + 1);

    let february = Period::day(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    let mut other = ArchiveWriter::new(&store, ArchiveParams::new(1, february, ""));
    assert_eq!(other.init_new_archive().unwrap(), 1);
    other.finalize_archive().unwrap();
}

#[test]
fn test_invalid_record_name_is_rejected() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let mut writer = ArchiveWriter::new(&store, params());
    writer.init_new_archive().unwrap();
    assert!(writer.insert_record("", 1).is_err());
    assert!(writer.insert_record(&"x".repeat(300), 1).is_err());
    writer.finalize_archive().unwrap();
}

#[test]
fn test_archive_written_inside_caller_transaction() {
    let store = ArchiveStore::open_in_memory().unwrap();
    store.connection().execute_batch("BEGIN").unwrap();

    let mut writer = ArchiveWriter::new(&store, params());
    let id = writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", 42).unwrap();
    for i in 0..3 {
        writer
            .insert_blob_record(&format!("table_{}", i), BlobRecord::Single(vec![i as u8 + 1]))
            .unwrap();
    }
    let tables: BTreeMap<i64, Vec<u8>> = (0..4).map(|i| (i, vec![7; 4])).collect();
    writer.insert_blob_record("tree", BlobRecord::Tables(tables)).unwrap();
    writer.finalize_archive().unwrap();

    assert!(!store.connection().is_autocommit());
    store.connection().execute_batch("COMMIT").unwrap();

    assert_eq!(flag_value(&store, id, "VisitsSummary_done"), ArchiveStatus::Ok.value());
    assert_eq!(row_count(&store, "archive_blob_2024_01", id), 5);
    let selector = ArchiveSelector::new(&store).with_today(today());
    let found = selector.get_archive_id_and_visits(&params()).unwrap().unwrap();
    assert_eq!(found.id_archive, id);
}
