use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use std::cmp::Ordering;
use std::path::Path;
use uuid::Uuid;

use crate::visited_spot::{BoundingBox, Coordinate, VisitedSpot};

/* The persistence side of the spot store. The in-memory `SpotStore` is the
source of truth for a session; this only has to make sure spots survive a
restart.

`visited_spot` keeps one row per spot. `lat`/`lng` are nullable because the
first version of the schema allowed half-written rows, those are skipped on
load and never make it into memory.
*/

/// What the spot store needs from a durable backend.
pub trait SpotDb: Send {
    fn load(&mut self) -> Result<Vec<VisitedSpot>>;

    /// Adds a new spot. A row that already exists is left untouched.
    fn insert(&mut self, spot: &VisitedSpot) -> Result<()>;

    /// Writes the latest state of a spot. Never lowers a stored
    /// `visit_count`, so writes arriving out of order cannot regress it.
    fn save(&mut self, spot: &VisitedSpot) -> Result<()>;

    fn query_range(&mut self, bbox: &BoundingBox) -> Result<Vec<VisitedSpot>>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn init_metadata_and_get_version(tx: &Transaction) -> Result<i32> {
    tx.execute(
        "CREATE TABLE IF NOT EXISTS `db_metadata` (
        `key`   TEXT NOT NULL,
        `value` TEXT,
        PRIMARY KEY(`key`)
        )",
        (),
    )?;
    let version_str: Option<String> = tx
        .query_row(
            "SELECT `value` FROM `db_metadata` WHERE key='version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match version_str {
        None => Ok(0),
        Some(s) => Ok(s.parse()?),
    }
}

fn set_version_in_metadata(tx: &Transaction, version: i32) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO `db_metadata` (key, value) VALUES (?1, ?2)",
        ("version", version.to_string()),
    )?;
    Ok(())
}

#[allow(clippy::type_complexity)]
fn open_db_and_run_migration(
    path: &Path,
    migrations: &[&dyn Fn(&Transaction) -> Result<()>],
) -> Result<Connection> {
    debug!("open and run migration for {:?}", path);
    let mut conn = Connection::open(path)?;
    let tx = conn.transaction()?;

    let version = init_metadata_and_get_version(&tx)? as usize;
    let target_version = migrations.len();
    debug!(
        "current version = {}, target_version = {}",
        version, target_version
    );
    match version.cmp(&target_version) {
        Ordering::Equal => (),
        Ordering::Less => {
            for (i, f) in migrations.iter().enumerate().skip(version) {
                info!("running migration for version: {}", i + 1);
                f(&tx)?;
            }
            set_version_in_metadata(&tx, target_version as i32)?;
        }
        Ordering::Greater => {
            bail!(
                "version too high: current version = {}, target_version = {}",
                version,
                target_version
            );
        }
    }
    tx.commit()?;
    Ok(conn)
}

fn run_sql_script(tx: &Transaction, sql: &str) -> Result<()> {
    for s in sql_split::split(sql) {
        tx.execute(&s, ())?;
    }
    Ok(())
}

// `None` means the row is not a usable spot (legacy partial row or garbage).
fn spot_of_row(row: &Row) -> rusqlite::Result<Option<VisitedSpot>> {
    let id: String = row.get(0)?;
    let lat: Option<f64> = row.get(1)?;
    let lng: Option<f64> = row.get(2)?;
    let first_visited_ms: i64 = row.get(3)?;
    let last_visited_ms: i64 = row.get(4)?;
    let visit_count: i64 = row.get(5)?;

    let spot = (|| {
        let coordinate = Coordinate::new(lat?, lng?).ok()?;
        Some(VisitedSpot {
            id: Uuid::parse_str(&id).ok()?,
            coordinate,
            first_visited: DateTime::<Utc>::from_timestamp_millis(first_visited_ms)?,
            last_visited: DateTime::<Utc>::from_timestamp_millis(last_visited_ms)?,
            visit_count: u32::try_from(visit_count).ok().filter(|c| *c >= 1)?,
        })
    })();
    if spot.is_none() {
        warn!("[main_db] skipping invalid visited_spot row: id={}", id);
    }
    Ok(spot)
}

pub struct MainDb {
    conn: Connection,
}

impl MainDb {
    pub fn open(path: &Path) -> Result<MainDb> {
        let conn = open_db_and_run_migration(
            path,
            &[
                &|tx| {
                    let sql = "
                    CREATE TABLE visited_spot (
                        id              TEXT    PRIMARY KEY
                                                NOT NULL
                                                UNIQUE,
                        lat             REAL,
                        lng             REAL,
                        first_visited   INTEGER NOT NULL, -- unix ms
                        last_visited    INTEGER NOT NULL, -- unix ms
                        visit_count     INTEGER NOT NULL DEFAULT 1
                    );
                    ";
                    run_sql_script(tx, sql)
                },
                &|tx| {
                    let sql = "
                    CREATE INDEX visited_spot_lat_lng_index ON visited_spot (
                        lat,
                        lng
                    );
                    ";
                    run_sql_script(tx, sql)
                },
            ],
        )
        .with_context(|| format!("failed to open main db at {:?}", path))?;
        Ok(MainDb { conn })
    }

    fn query_spots<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<VisitedSpot>> {
        let mut query = self.conn.prepare(sql)?;
        let rows = query.query_map(params, spot_of_row)?;
        let mut results = Vec::new();
        for row in rows {
            if let Some(spot) = row? {
                results.push(spot);
            }
        }
        Ok(results)
    }
}

impl SpotDb for MainDb {
    fn load(&mut self) -> Result<Vec<VisitedSpot>> {
        // `rowid` follows insertion order, so the loaded order is stable.
        self.query_spots(
            "SELECT id, lat, lng, first_visited, last_visited, visit_count FROM visited_spot ORDER BY rowid;",
            (),
        )
    }

    fn insert(&mut self, spot: &VisitedSpot) -> Result<()> {
        let sql = "INSERT INTO visited_spot (id, lat, lng, first_visited, last_visited, visit_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(id) DO NOTHING;";
        self.conn.prepare_cached(sql)?.execute((
            spot.id.as_hyphenated().to_string(),
            spot.latitude(),
            spot.longitude(),
            spot.first_visited.timestamp_millis(),
            spot.last_visited.timestamp_millis(),
            spot.visit_count,
        ))?;
        Ok(())
    }

    fn save(&mut self, spot: &VisitedSpot) -> Result<()> {
        let sql = "INSERT INTO visited_spot (id, lat, lng, first_visited, last_visited, visit_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET last_visited = excluded.last_visited, visit_count = excluded.visit_count
            WHERE excluded.visit_count >= visited_spot.visit_count;";
        self.conn.prepare_cached(sql)?.execute((
            spot.id.as_hyphenated().to_string(),
            spot.latitude(),
            spot.longitude(),
            spot.first_visited.timestamp_millis(),
            spot.last_visited.timestamp_millis(),
            spot.visit_count,
        ))?;
        Ok(())
    }

    fn query_range(&mut self, bbox: &BoundingBox) -> Result<Vec<VisitedSpot>> {
        self.query_spots(
            "SELECT id, lat, lng, first_visited, last_visited, visit_count FROM visited_spot
             WHERE lat >= ?1 AND lat <= ?2 AND lng >= ?3 AND lng <= ?4 ORDER BY rowid;",
            (bbox.min_lat, bbox.max_lat, bbox.min_lng, bbox.max_lng),
        )
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.cache_flush()?;
        Ok(())
    }
}
