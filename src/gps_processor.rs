use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::spot_store::{SpotStore, StoreError, UpsertAction, Upserted};
use crate::visited_spot::Coordinate;

/// A location update as delivered by the sensor. Coordinates are raw and
/// not validated yet.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum IngestOutcome {
    Upserted(Upserted),
    /// Dropped because of the accuracy window or a bad coordinate. This is
    /// expected to happen all the time and is not an error.
    Rejected,
    /// The spot store has the change but could not persist it.
    Degraded(StoreError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: usize,
    pub merged: usize,
    pub rejected: usize,
    pub degraded: usize,
}

impl IngestSummary {
    fn add(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Upserted(upserted) => match upserted.action {
                UpsertAction::Inserted => self.inserted += 1,
                UpsertAction::Merged => self.merged += 1,
            },
            IngestOutcome::Rejected => self.rejected += 1,
            IngestOutcome::Degraded(_) => self.degraded += 1,
        }
    }
}

/// Filters fixes and forwards the good ones to the spot store.
pub struct GpsProcessor {
    store: Arc<SpotStore>,
    max_accuracy_meters: f64,
}

impl GpsProcessor {
    pub fn new(store: Arc<SpotStore>, max_accuracy_meters: f64) -> Self {
        Self {
            store,
            max_accuracy_meters,
        }
    }

    // Negative accuracy is how sensors report "no fix", anything at or above
    // the max is too fuzzy to tell spots apart.
    pub fn accepts_accuracy(&self, horizontal_accuracy: f64) -> bool {
        (0.0..self.max_accuracy_meters).contains(&horizontal_accuracy)
    }

    pub fn handle_fix(&self, fix: &LocationFix) -> IngestOutcome {
        if !self.accepts_accuracy(fix.horizontal_accuracy) {
            debug!(
                "[gps_processor] rejected fix, accuracy={}",
                fix.horizontal_accuracy
            );
            return IngestOutcome::Rejected;
        }
        let coordinate = match Coordinate::new(fix.latitude, fix.longitude) {
            Ok(coordinate) => coordinate,
            Err(e) => {
                debug!("[gps_processor] rejected fix: {}", e);
                return IngestOutcome::Rejected;
            }
        };
        self.upsert(coordinate, fix.timestamp.unwrap_or_else(Utc::now))
    }

    /// Handles a batch in the order it arrived. Out of order timestamps
    /// are not sorted: whichever fix is applied last sets `last_visited`.
    pub fn handle_fixes<'a>(&self, fixes: impl IntoIterator<Item = &'a LocationFix>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for fix in fixes {
            summary.add(&self.handle_fix(fix));
        }
        summary
    }

    /// Same as a sensor fix, minus the accuracy filter. Used for taps on
    /// the map.
    pub fn handle_manual(&self, coordinate: Coordinate) -> IngestOutcome {
        self.upsert(coordinate, Utc::now())
    }

    fn upsert(&self, coordinate: Coordinate, at: DateTime<Utc>) -> IngestOutcome {
        match self.store.upsert(coordinate, at) {
            Ok(upserted) => IngestOutcome::Upserted(upserted),
            Err(e) => IngestOutcome::Degraded(e),
        }
    }
}
