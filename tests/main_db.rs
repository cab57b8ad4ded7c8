pub mod test_utils;

use fogmap_core::config::PersistenceMode;
use fogmap_core::gps_processor::{GpsProcessor, IngestOutcome};
use fogmap_core::main_db::{MainDb, SpotDb};
use fogmap_core::spot_store::{
    SpotStore, StoreError, UpsertAction, MAX_PENDING_WRITE_FAILURES,
};
use fogmap_core::visited_spot::{BoundingBox, VisitedSpot};
use rusqlite::Connection;
use std::sync::Arc;
use tempdir::TempDir;
use test_utils::{coordinate, fix, utc, FlakyDb};

const DELTA: f64 = 0.0005;

#[test]
fn spots_survive_restart() {
    test_utils::init_logger();
    let temp_dir = TempDir::new("main_db-restart").unwrap();
    let path = temp_dir.path().join("spots.db");

    let (first_id, second_id) = {
        let store =
            SpotStore::open(DELTA, Box::new(MainDb::open(&path).unwrap()), PersistenceMode::Immediate)
                .unwrap();
        let first = store
            .upsert(coordinate(35.6762, 139.6503), utc(2025, 1, 1, 9, 0))
            .unwrap();
        store
            .upsert(coordinate(35.6763, 139.6503), utc(2025, 1, 2, 9, 0))
            .unwrap();
        let second = store
            .upsert(coordinate(34.6937, 135.5023), utc(2025, 1, 3, 9, 0))
            .unwrap();
        (first.spot.id, second.spot.id)
    };

    let store =
        SpotStore::open(DELTA, Box::new(MainDb::open(&path).unwrap()), PersistenceMode::Immediate)
            .unwrap();
    let spots = store.snapshot();
    assert_eq!(spots.len(), 2);
    assert_eq!(spots[0].id, first_id);
    assert_eq!(spots[0].visit_count, 2);
    assert_eq!(spots[0].first_visited, utc(2025, 1, 1, 9, 0));
    assert_eq!(spots[0].last_visited, utc(2025, 1, 2, 9, 0));
    assert_eq!(spots[1].id, second_id);

    // merging keeps working against loaded spots
    let upserted = store
        .upsert(coordinate(35.6762, 139.6504), utc(2025, 1, 4, 9, 0))
        .unwrap();
    assert_eq!(upserted.action, UpsertAction::Merged);
    assert_eq!(upserted.spot.visit_count, 3);
}

#[test]
fn legacy_rows_without_coordinates_are_skipped() {
    let temp_dir = TempDir::new("main_db-legacy").unwrap();
    let path = temp_dir.path().join("spots.db");
    drop(MainDb::open(&path).unwrap());

    let conn = Connection::open(&path).unwrap();
    conn.execute(
        "INSERT INTO visited_spot (id, lat, lng, first_visited, last_visited, visit_count) VALUES (?1, NULL, 12.0, 0, 0, 1)",
        ["5f0c6f53-94a2-4b7e-9a3e-6c1e0a4d2b11"],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO visited_spot (id, lat, lng, first_visited, last_visited, visit_count) VALUES (?1, 12.0, 12.0, 0, 0, 1)",
        ["0b8e5d8e-2f7c-4f2a-8f7e-1d9b3c6a4e22"],
    )
    .unwrap();
    drop(conn);

    let mut db = MainDb::open(&path).unwrap();
    let spots = db.load().unwrap();
    assert_eq!(spots.len(), 1);
    assert_eq!(spots[0].latitude(), 12.0);

    let everything = BoundingBox {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lng: -180.0,
        max_lng: 180.0,
    };
    assert_eq!(db.query_range(&everything).unwrap().len(), 1);
}

#[test]
fn save_never_lowers_visit_count() {
    let temp_dir = TempDir::new("main_db-monotonic").unwrap();
    let mut db = MainDb::open(&temp_dir.path().join("spots.db")).unwrap();

    let mut spot = VisitedSpot::new(coordinate(1.0, 2.0), utc(2025, 1, 1, 0, 0));
    db.insert(&spot).unwrap();
    let stale = spot.clone();
    spot.visit(utc(2025, 1, 1, 1, 0));
    spot.visit(utc(2025, 1, 1, 2, 0));
    db.save(&spot).unwrap();
    // a late write of an older state
    db.save(&stale).unwrap();
    // inserting the same id again is a no-op
    db.insert(&stale).unwrap();

    let spots = db.load().unwrap();
    assert_eq!(spots, vec![spot]);
}

#[test]
fn query_range_filters() {
    let temp_dir = TempDir::new("main_db-query").unwrap();
    let mut db = MainDb::open(&temp_dir.path().join("spots.db")).unwrap();
    let at = utc(2025, 1, 1, 0, 0);
    for (lat, lng) in [(1.0, 1.0), (2.0, 2.0), (-1.0, -1.0)] {
        db.insert(&VisitedSpot::new(coordinate(lat, lng), at))
            .unwrap();
    }
    let spots = db
        .query_range(&BoundingBox {
            min_lat: 0.0,
            max_lat: 2.0,
            min_lng: 0.0,
            max_lng: 1.5,
        })
        .unwrap();
    assert_eq!(spots.len(), 1);
    assert_eq!(spots[0].latitude(), 1.0);
}

#[test]
fn write_behind_flush() {
    let temp_dir = TempDir::new("main_db-write_behind").unwrap();
    let path = temp_dir.path().join("spots.db");
    {
        let store = SpotStore::open(
            DELTA,
            Box::new(MainDb::open(&path).unwrap()),
            PersistenceMode::WriteBehind,
        )
        .unwrap();
        for i in 0..50 {
            store
                .upsert(coordinate(i as f64 * 0.01, 0.0), utc(2025, 1, 1, 0, 0))
                .unwrap();
            store
                .upsert(coordinate(i as f64 * 0.01, 0.0), utc(2025, 1, 1, 1, 0))
                .unwrap();
        }
        store.flush().unwrap();
        assert!(store.take_write_failures().is_empty());
    }
    let spots = MainDb::open(&path).unwrap().load().unwrap();
    assert_eq!(spots.len(), 50);
    assert!(spots.iter().all(|spot| spot.visit_count == 2));
}

#[test]
fn failed_write_is_degraded_not_lost() {
    test_utils::init_logger();
    let db = FlakyDb::default();
    let store = Arc::new(
        SpotStore::open(DELTA, Box::new(db.clone()), PersistenceMode::Immediate).unwrap(),
    );
    let processor = GpsProcessor::new(store.clone(), 50.0);

    db.set_failing(true);
    match processor.handle_fix(&fix(7.0, 7.0, 5.0)) {
        IngestOutcome::Degraded(StoreError::Degraded { upserted, .. }) => {
            assert_eq!(upserted.action, UpsertAction::Inserted)
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    // memory has it, the db does not
    assert_eq!(store.len(), 1);
    assert!(db.rows().is_empty());

    // the engine keeps going once the db recovers
    db.set_failing(false);
    assert!(matches!(
        processor.handle_fix(&fix(7.0, 7.0, 5.0)),
        IngestOutcome::Upserted(_)
    ));
    assert_eq!(store.snapshot()[0].visit_count, 2);
    assert_eq!(db.rows()[0].visit_count, 2);
}

#[test]
fn write_behind_failures_are_reported() {
    let db = FlakyDb::default();
    let store =
        SpotStore::open(DELTA, Box::new(db.clone()), PersistenceMode::WriteBehind).unwrap();
    db.set_failing(true);
    // queued, so the caller sees no error
    store
        .upsert(coordinate(7.0, 7.0), utc(2025, 1, 1, 0, 0))
        .unwrap();
    store.flush().unwrap();
    let failures = store.take_write_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].to_string().contains("could not be persisted"));
    assert!(store.take_write_failures().is_empty());
    assert_eq!(store.len(), 1);
}

#[test]
fn write_behind_failures_are_capped() {
    let db = FlakyDb::default();
    let store =
        SpotStore::open(DELTA, Box::new(db.clone()), PersistenceMode::WriteBehind).unwrap();
    db.set_failing(true);
    let total = MAX_PENDING_WRITE_FAILURES + 50;
    for i in 0..total {
        store
            .upsert(coordinate(i as f64 * 0.01, 0.0), utc(2025, 1, 1, 0, 0))
            .unwrap();
    }
    store.flush().unwrap();

    let failures = store.take_write_failures();
    assert_eq!(failures.len(), MAX_PENDING_WRITE_FAILURES);
    assert_eq!(store.dropped_write_failures(), 50);
    // the newest failures are the ones kept
    let StoreError::Degraded { upserted, .. } = failures.last().unwrap();
    assert_eq!(upserted.spot.latitude(), (total - 1) as f64 * 0.01);
    assert_eq!(store.len(), total);
}
