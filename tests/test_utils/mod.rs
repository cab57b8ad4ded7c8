#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use fogmap_core::gps_processor::LocationFix;
use fogmap_core::main_db::SpotDb;
use fogmap_core::visited_spot::{BoundingBox, Coordinate, VisitedSpot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn coordinate(lat: f64, lng: f64) -> Coordinate {
    Coordinate::new(lat, lng).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn fix(lat: f64, lng: f64, horizontal_accuracy: f64) -> LocationFix {
    LocationFix {
        latitude: lat,
        longitude: lng,
        horizontal_accuracy,
        timestamp: None,
    }
}

pub fn spot(lat: f64, lng: f64, visit_count: u32, first_visited: DateTime<Utc>) -> VisitedSpot {
    let mut spot = VisitedSpot::new(coordinate(lat, lng), first_visited);
    spot.visit_count = visit_count;
    spot
}

/// In-memory `SpotDb` whose writes can be switched to fail.
#[derive(Clone, Default)]
pub struct FlakyDb {
    pub rows: Arc<Mutex<Vec<VisitedSpot>>>,
    pub failing: Arc<AtomicBool>,
}

impl FlakyDb {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<VisitedSpot> {
        self.rows.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("disk I/O error");
        }
        Ok(())
    }
}

impl SpotDb for FlakyDb {
    fn load(&mut self) -> Result<Vec<VisitedSpot>> {
        Ok(self.rows())
    }

    fn insert(&mut self, spot: &VisitedSpot) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        if !rows.iter().any(|row| row.id == spot.id) {
            rows.push(spot.clone());
        }
        Ok(())
    }

    fn save(&mut self, spot: &VisitedSpot) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|row| row.id == spot.id) {
            Some(row) => {
                if spot.visit_count >= row.visit_count {
                    *row = spot.clone();
                }
            }
            None => rows.push(spot.clone()),
        }
        Ok(())
    }

    fn query_range(&mut self, bbox: &BoundingBox) -> Result<Vec<VisitedSpot>> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|spot| bbox.contains(&spot.coordinate))
            .collect())
    }
}
