use chrono::{NaiveDate, NaiveDateTime};
use tally::archive::{
    ArchiveIdAndVisits, ArchiveParams, ArchiveSelector, ArchiveStatus, ArchiveStore,
    ArchiveWriter, RecordKind, SelectorOptions,
};
use tally::cache::ArchiveIdCache;
use tally::period::Period;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn day() -> Period {
    Period::day(date(10))
}

fn insert(store: &ArchiveStore, period: Period, id: i64, name: &str, value: i64) {
    let table = store
        .ensure_archive_table(RecordKind::Numeric, period.start)
        .unwrap();
    store
        .connection()
        .execute(
            &format!(
                "INSERT INTO {} (idarchive, name, idsite, date1, date2, period, ts_archived, value)
                 VALUES (?, ?, 1, ?, ?, ?, '2024-01-11 00:00:00', ?)",
                table
            ),
            rusqlite::params![
                id,
                name,
                period.start.format("%Y-%m-%d").to_string(),
                period.end.format("%Y-%m-%d").to_string(),
                period.kind.id(),
                value
            ],
        )
        .unwrap();
}

fn write_archive(store: &ArchiveStore, params: ArchiveParams, visits: i64) -> i64 {
    let mut writer = ArchiveWriter::new(store, params);
    writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", visits).unwrap();
    writer.finalize_archive().unwrap()
}

#[test]
fn test_resolves_done_archive_and_visits() {
    let store = ArchiveStore::open_in_memory().unwrap();
    insert(&store, day(), 5, "VisitsSummary_done", 1);
    insert(&store, day(), 5, "nb_visits", 42);

    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let params = ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary");
    assert_eq!(
        selector.get_archive_id_and_visits(&params).unwrap(),
        Some(ArchiveIdAndVisits {
            id_archive: 5,
            visits: 42,
            visits_converted: 0,
        })
    );
}

#[test]
fn test_newest_archive_wins() {
    let store = ArchiveStore::open_in_memory().unwrap();
    insert(&store, day(), 7, "VisitsSummary_done", 1);
    insert(&store, day(), 7, "nb_visits", 20);
    insert(&store, day(), 3, "VisitsSummary_done", 1);
    insert(&store, day(), 3, "nb_visits", 10);
    insert(&store, day(), 3, "nb_visits_converted", 4);

    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let params = ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary");
    let found = selector.get_archive_id_and_visits(&params).unwrap().unwrap();
    assert_eq!(found.id_archive, 7);
    assert_eq!(found.visits, 20);
    assert_eq!(found.visits_converted, 0);
}

#[test]
fn test_unfinished_or_other_segment_archives_ignored() {
    let store = ArchiveStore::open_in_memory().unwrap();
    insert(&store, day(), 9, "VisitsSummary_done", ArchiveStatus::Error.value());

    let segmented = ArchiveParams::new(1, day(), "visitCount>1").with_plugin("VisitsSummary");
    write_archive(&store, segmented.clone(), 3);

    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let plain = ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary");
    assert_eq!(selector.get_archive_id_and_visits(&plain).unwrap(), None);

    let found = selector.get_archive_id_and_visits(&segmented).unwrap().unwrap();
    assert_eq!(found.visits, 3);
}

#[test]
fn test_visits_come_from_visits_summary_archive() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let visits_id = write_archive(
        &store,
        ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary"),
        42,
    );

    let mut goals = ArchiveWriter::new(&store, ArchiveParams::new(1, day(), "").with_plugin("Goals"));
    let goals_id = goals.init_new_archive().unwrap();
    goals.insert_record("nb_conversions", 6).unwrap();
    goals.finalize_archive().unwrap();
    assert_ne!(visits_id, goals_id);

    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let found = selector
        .get_archive_id_and_visits(&ArchiveParams::new(1, day(), "").with_plugin("Goals"))
        .unwrap()
        .unwrap();
    assert_eq!(found.id_archive, goals_id);
    assert_eq!(found.visits, 42);
}

#[test]
fn test_all_plugins_archive_serves_plugin_requests() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let id = write_archive(&store, ArchiveParams::new(1, day(), ""), 12);

    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let found = selector
        .get_archive_id_and_visits(&ArchiveParams::new(1, day(), "").with_plugin("Referrers"))
        .unwrap()
        .unwrap();
    assert_eq!(found.id_archive, id);
    assert_eq!(found.visits, 12);

    let ids = selector
        .get_archive_ids(&[1], &[day()], "", &["Referrers"])
        .unwrap();
    assert_eq!(ids.get(&(day().start, day().end)), Some(&vec![id]));
}

#[test]
fn test_archive_ids_keep_max_id_per_flag() {
    let store = ArchiveStore::open_in_memory().unwrap();
    insert(&store, day(), 3, "VisitsSummary_done", 1);
    insert(&store, day(), 7, "VisitsSummary_done", 1);
    insert(&store, day(), 8, "VisitsSummary_done", ArchiveStatus::Error.value());
    insert(&store, day(), 4, "Goals_done", 1);
    let other_day = Period::day(date(11));
    insert(&store, other_day, 9, "VisitsSummary_done", ArchiveStatus::Temporary.value());

    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let ids = selector
        .get_archive_ids(&[1], &[day(), other_day], "", &["VisitsSummary", "Goals"])
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[&(day().start, day().end)], vec![4, 7]);
    assert_eq!(ids[&(other_day.start, other_day.end)], vec![9]);

    let only_visits = selector
        .get_archive_ids(&[1], &[day()], "", &["VisitsSummary"])
        .unwrap();
    assert_eq!(only_visits[&(day().start, day().end)], vec![7]);
}

#[test]
fn test_future_periods_are_skipped() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let near = Period::day(date(12));
    let far = Period::day(date(13));
    insert(&store, near, 1, "done", 1);
    insert(&store, far, 2, "done", 1);

    let selector = ArchiveSelector::new(&store).with_today(date(10));
    let ids = selector.get_archive_ids(&[1], &[near, far], "", &[]).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[&(near.start, near.end)], vec![1]);
}

#[test]
fn test_empty_inputs_select_nothing() {
    let store = ArchiveStore::open_in_memory().unwrap();
    insert(&store, day(), 1, "done", 1);
    let selector = ArchiveSelector::new(&store).with_today(date(20));
    assert!(selector.get_archive_ids(&[], &[day()], "", &[]).unwrap().is_empty());
    assert!(selector.get_archive_ids(&[1], &[], "", &[]).unwrap().is_empty());
    assert!(selector.get_archive_ids(&[2], &[day()], "", &[]).unwrap().is_empty());
}

#[test]
fn test_invalidated_archives_need_opt_in() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let params = ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary");
    let id = write_archive(&store, params.clone(), 5);
    let table = store.naming().numeric_table_for(day().start);
    assert_eq!(
        store
            .set_archive_status(&table, id, ArchiveStatus::Invalidated)
            .unwrap(),
        1
    );

    let strict = ArchiveSelector::new(&store).with_today(date(20));
    assert_eq!(strict.get_archive_id_and_visits(&params).unwrap(), None);

    let lenient = ArchiveSelector::new(&store)
        .with_today(date(20))
        .with_options(SelectorOptions {
            include_invalidated: true,
            ..SelectorOptions::default()
        });
    assert_eq!(
        lenient.get_archive_id_and_visits(&params).unwrap().map(|a| a.id_archive),
        Some(id)
    );
}

#[test]
fn test_min_ts_archived_filters_old_archives() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let params = ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary");
    let old: NaiveDateTime = date(11).and_hms_opt(1, 0, 0).unwrap();
    let mut writer = ArchiveWriter::new(&store, params.clone()).with_ts_archived(old);
    writer.init_new_archive().unwrap();
    writer.insert_record("nb_visits", 5).unwrap();
    writer.finalize_archive().unwrap();

    let selector = ArchiveSelector::new(&store)
        .with_today(date(20))
        .with_options(SelectorOptions {
            min_ts_archived: Some(date(12).and_hms_opt(0, 0, 0).unwrap()),
            include_invalidated: false,
        });
    assert_eq!(selector.get_archive_id_and_visits(&params).unwrap(), None);
    assert!(selector
        .get_archive_ids(&[1], &[day()], "", &["VisitsSummary"])
        .unwrap()
        .is_empty());
}

#[test]
fn test_cached_lookup_is_reused_until_invalidated() {
    let store = ArchiveStore::open_in_memory().unwrap();
    let params = ArchiveParams::new(1, day(), "").with_plugin("VisitsSummary");
    let selector = ArchiveSelector::new(&store).with_today(date(20));
    let mut cache = ArchiveIdCache::new();

    assert_eq!(
        selector
            .get_archive_id_and_visits_cached(&params, &mut cache)
            .unwrap(),
        None
    );

    let id = write_archive(&store, params.clone(), 9);
    // the cached miss still answers
    assert_eq!(
        selector
            .get_archive_id_and_visits_cached(&params, &mut cache)
            .unwrap(),
        None
    );

    assert!(cache.invalidate(&params));
    let found = selector
        .get_archive_id_and_visits_cached(&params, &mut cache)
        .unwrap()
        .unwrap();
    assert_eq!(found.id_archive, id);
    assert_eq!(found.visits, 9);
}
