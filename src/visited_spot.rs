use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("latitude {0} is not a finite value in [-90, 90]")]
    InvalidLatitude(f64),
    #[error("longitude {0} is not a finite value in [-180, 180]")]
    InvalidLongitude(f64),
}

/// A validated WGS84 position in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::InvalidLatitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    // NOTE: this is an axis-aligned box test on raw degrees, not a distance.
    // A longitude delta covers less ground the closer we get to the poles.
    pub fn within_box_of(&self, other: &Coordinate, delta_degrees: f64) -> bool {
        (self.latitude - other.latitude).abs() < delta_degrees
            && (self.longitude - other.longitude).abs() < delta_degrees
    }
}

/// Inclusive latitude/longitude rectangle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn around(center: &Coordinate, delta_degrees: f64) -> Self {
        Self {
            min_lat: center.latitude - delta_degrees,
            max_lat: center.latitude + delta_degrees,
            min_lng: center.longitude - delta_degrees,
            max_lng: center.longitude + delta_degrees,
        }
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        coordinate.latitude >= self.min_lat
            && coordinate.latitude <= self.max_lat
            && coordinate.longitude >= self.min_lng
            && coordinate.longitude <= self.max_lng
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisitedSpot {
    pub id: Uuid,
    pub coordinate: Coordinate,
    pub first_visited: DateTime<Utc>,
    pub last_visited: DateTime<Utc>,
    pub visit_count: u32,
}

impl VisitedSpot {
    pub fn new(coordinate: Coordinate, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            coordinate,
            first_visited: at,
            last_visited: at,
            visit_count: 1,
        }
    }

    // `first_visited` never changes. `last_visited` takes whatever we are
    // given, even if it is older than the current value: the last applied
    // fix wins, not the latest timestamp.
    pub fn visit(&mut self, at: DateTime<Utc>) {
        self.visit_count = self.visit_count.saturating_add(1);
        self.last_visited = at;
    }

    pub fn latitude(&self) -> f64 {
        self.coordinate.latitude()
    }

    pub fn longitude(&self) -> f64 {
        self.coordinate.longitude()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn rejects_invalid_coordinates() {
        assert!(matches!(
            Coordinate::new(f64::NAN, 0.0),
            Err(CoordinateError::InvalidLatitude(_))
        ));
        assert!(matches!(
            Coordinate::new(91.0, 0.0),
            Err(CoordinateError::InvalidLatitude(_))
        ));
        assert!(matches!(
            Coordinate::new(0.0, -180.5),
            Err(CoordinateError::InvalidLongitude(_))
        ));
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn box_test_is_strict_and_per_axis() {
        let a = Coordinate::new(10.0, 10.0).unwrap();
        assert!(a.within_box_of(&Coordinate::new(10.00049, 10.0).unwrap(), 0.0005));
        assert!(!a.within_box_of(&Coordinate::new(10.0006, 10.0).unwrap(), 0.0005));
        // diagonal corner of the box is still "inside", unlike a circle
        assert!(a.within_box_of(&Coordinate::new(10.00049, 10.00049).unwrap(), 0.0005));
    }

    #[test]
    fn visit_keeps_first_and_overwrites_last() {
        let t0 = Utc.with_ymd_and_hms(2025, 2, 21, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 2, 21, 12, 0, 0).unwrap();
        let t_old = Utc.with_ymd_and_hms(2025, 2, 20, 8, 0, 0).unwrap();
        let mut spot = VisitedSpot::new(Coordinate::new(1.0, 2.0).unwrap(), t0);
        spot.visit(t1);
        spot.visit(t_old);
        assert_eq!(spot.visit_count, 3);
        assert_eq!(spot.first_visited, t0);
        assert_eq!(spot.last_visited, t_old);
    }
}
