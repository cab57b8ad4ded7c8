use chrono::{DateTime, NaiveDate, TimeZone};
use itertools::Itertools;
use std::f64::consts::PI;
use std::sync::Arc;

use crate::spot_store::SpotStore;
use crate::utils;
use crate::visited_spot::VisitedSpot;

// Earth's surface, unit: km^2
pub const WORLD_AREA: f64 = 510_072_000.0;
// Every spot counts as a disk of 60m radius, unit: km^2
pub const UNIT_SPOT_RADIUS: f64 = 0.06;
pub const UNIT_SPOT_AREA: f64 = UNIT_SPOT_RADIUS * UNIT_SPOT_RADIUS * PI;

// This is a proportional estimate, not the area of the union of disks:
// overlapping spots are counted twice.
pub fn covered_area_km2(spot_count: usize) -> f64 {
    spot_count as f64 * UNIT_SPOT_AREA
}

/// Fraction of the world covered by `spots`.
pub fn coverage_area(spots: &[VisitedSpot]) -> f64 {
    covered_area_km2(spots.len()) / WORLD_AREA
}

/// Same as `coverage_area`, counting only spots first visited on the
/// calendar day of `now` (in `now`'s time zone).
pub fn today_coverage_area<Tz: TimeZone>(spots: &[VisitedSpot], now: &DateTime<Tz>) -> f64 {
    let tz = now.timezone();
    let today = now.date_naive();
    let count = spots
        .iter()
        .filter(|spot| utils::local_day(&spot.first_visited, &tz) == today)
        .count();
    covered_area_km2(count) / WORLD_AREA
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyCount {
    pub day: NaiveDate,
    pub cumulative_count: u64,
}

/// Number of spots discovered up to and including each day that has any,
/// oldest day first.
pub fn cumulative_daily_series<Tz: TimeZone>(spots: &[VisitedSpot], tz: &Tz) -> Vec<DailyCount> {
    let counts = spots
        .iter()
        .map(|spot| utils::local_day(&spot.first_visited, tz))
        .counts();
    let mut running_total = 0;
    counts
        .into_iter()
        .sorted()
        .map(|(day, count)| {
            running_total += count as u64;
            DailyCount {
                day,
                cumulative_count: running_total,
            }
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverageStats {
    pub all_time: f64,
    pub today: f64,
}

impl CoverageStats {
    /// Both fractions in ‱ (per ten thousand), the unit shown to users.
    pub fn per_ten_thousand(&self) -> (f64, f64) {
        (self.all_time * 10_000.0, self.today * 10_000.0)
    }
}

/// Reads a snapshot of the store and turns it into numbers for display.
pub struct CoverageAggregator<Tz: TimeZone> {
    store: Arc<SpotStore>,
    tz: Tz,
}

impl<Tz: TimeZone> CoverageAggregator<Tz> {
    pub fn new(store: Arc<SpotStore>, tz: Tz) -> Self {
        Self { store, tz }
    }

    pub fn coverage_stats_at(&self, now: &DateTime<Tz>) -> CoverageStats {
        let spots = self.store.snapshot();
        CoverageStats {
            all_time: coverage_area(&spots),
            today: today_coverage_area(&spots, now),
        }
    }

    pub fn coverage_stats(&self) -> CoverageStats {
        let now = chrono::Utc::now().with_timezone(&self.tz);
        self.coverage_stats_at(&now)
    }

    pub fn trend_series(&self) -> Vec<DailyCount> {
        cumulative_daily_series(&self.store.snapshot(), &self.tz)
    }
}
