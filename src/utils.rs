use std::f64::consts::PI;

use chrono::{DateTime, NaiveDate, TimeZone};

// The world plane used for rendering: Web Mercator scaled to 2^28 units, the
// same plane MapKit's `MKMapPoint` lives in. Origin is the north-west corner.
pub const MAP_WORLD_SIZE: f64 = 268_435_456.0;

// Web Mercator is undefined at the poles, clamp like every slippy map does.
pub const MAX_MERCATOR_LAT: f64 = 85.05112878;

// https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
pub fn lng_lat_to_map_point(lng: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let lat_rad = (lat / 180.0) * PI;
    let x = ((lng + 180.0) / 360.0) * MAP_WORLD_SIZE;
    let y = (1.0 - ((lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI)) / 2.0 * MAP_WORLD_SIZE;
    // the rounded latitude limit lands a hair outside the plane
    (x, y.clamp(0.0, MAP_WORLD_SIZE))
}

pub fn map_point_to_lng_lat(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / MAP_WORLD_SIZE) * 360.0 - 180.0;
    let lat = (f64::atan(f64::sinh(PI * (1.0 - (2.0 * y) / MAP_WORLD_SIZE))) * 180.0) / PI;
    (lng, lat)
}

/// Width of one slippy-map tile at `zoom`, in map units.
pub fn tile_width_in_map_units(zoom: i32) -> f64 {
    MAP_WORLD_SIZE / f64::powi(2.0, zoom)
}

/// The calendar day `time` falls on, as seen from `tz`.
pub fn local_day<Tz: TimeZone, Src: TimeZone>(time: &DateTime<Src>, tz: &Tz) -> NaiveDate {
    time.with_timezone(tz).date_naive()
}
