use anyhow::Result;

use crate::utils::{self, MAP_WORLD_SIZE};
use crate::visited_spot::{BoundingBox, Coordinate};

/// A rectangle on the map plane, in map units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MapRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl MapRect {
    pub const WORLD: MapRect = MapRect {
        x: 0.0,
        y: 0.0,
        width: MAP_WORLD_SIZE,
        height: MAP_WORLD_SIZE,
    };

    pub fn expanded(&self, by: f64) -> MapRect {
        MapRect {
            x: self.x - by,
            y: self.y - by,
            width: self.width + 2.0 * by,
            height: self.height + 2.0 * by,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    // Whether the rect stays inside one copy of the world horizontally.
    fn wraps_antimeridian(&self) -> bool {
        self.x < 0.0 || self.x + self.width > MAP_WORLD_SIZE
    }
}

/// What the caller is looking at: a map rect and how many pixels one map
/// unit takes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub rect: MapRect,
    pub zoom_scale: f64,
}

impl Viewport {
    pub fn new(rect: MapRect, zoom_scale: f64) -> Result<Self> {
        if !(rect.width > 0.0 && rect.height > 0.0) {
            bail!(
                "Invalid viewport size: width={}, height={}",
                rect.width,
                rect.height
            );
        }
        if !(zoom_scale > 0.0 && zoom_scale.is_finite()) {
            bail!("Invalid zoom scale: {}", zoom_scale);
        }
        Ok(Self { rect, zoom_scale })
    }

    /// The whole world squeezed into `pixel_width` x `pixel_width` pixels.
    pub fn world(pixel_width: u32) -> Result<Self> {
        Self::new(MapRect::WORLD, pixel_width as f64 / MAP_WORLD_SIZE)
    }

    /// A slippy-map tile, see https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
    pub fn for_tile(x: i64, y: i64, zoom: i32, tile_size: u32) -> Result<Self> {
        if !(0..=25).contains(&zoom) {
            bail!("Invalid zoom level: {zoom} (must be 0-25)");
        }
        let n = 1i64 << zoom;
        if y < 0 || y >= n {
            bail!("Invalid y coordinate: {} (must be 0-{})", y, n - 1);
        }
        // x is allowed to run past the antimeridian, round it off.
        let x = x.rem_euclid(n);
        let tile_width = utils::tile_width_in_map_units(zoom);
        Self::new(
            MapRect {
                x: x as f64 * tile_width,
                y: y as f64 * tile_width,
                width: tile_width,
                height: tile_width,
            },
            tile_size as f64 / tile_width,
        )
    }

    /// Map view area given as lng/lat edges, rendered `pixel_width` wide.
    pub fn from_lng_lat_bounds(
        left: f64,
        top: f64,
        right: f64,
        bottom: f64,
        pixel_width: u32,
    ) -> Result<Self> {
        let (left_x, top_y) = utils::lng_lat_to_map_point(left, top);
        let (mut right_x, bottom_y) = utils::lng_lat_to_map_point(right, bottom);
        if right_x < left_x {
            // crossing the antimeridian
            right_x += MAP_WORLD_SIZE;
        }
        let width = right_x - left_x;
        Self::new(
            MapRect {
                x: left_x,
                y: top_y,
                width,
                height: bottom_y - top_y,
            },
            pixel_width as f64 / width,
        )
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.rect.width * self.zoom_scale).ceil() as u32,
            (self.rect.height * self.zoom_scale).ceil() as u32,
        )
    }

    /// Pixel position of a map point.
    pub fn map_point_to_pixel(&self, x: f64, y: f64) -> (f32, f32) {
        (
            ((x - self.rect.x) * self.zoom_scale) as f32,
            ((y - self.rect.y) * self.zoom_scale) as f32,
        )
    }

    /// Every pixel position where a circle of `radius` map units around
    /// `coordinate` touches the viewport. Usually zero or one, more than one
    /// only when the viewport spans the antimeridian.
    pub fn project_with_radius(&self, coordinate: &Coordinate, radius: f64) -> Vec<(f32, f32)> {
        let (x, y) = utils::lng_lat_to_map_point(coordinate.longitude(), coordinate.latitude());
        let culling_rect = self.rect.expanded(radius);
        [-MAP_WORLD_SIZE, 0.0, MAP_WORLD_SIZE]
            .iter()
            .map(|offset| x + offset)
            .filter(|x| culling_rect.contains(*x, y))
            .map(|x| self.map_point_to_pixel(x, y))
            .collect()
    }

    /// Lat/lng box covering the viewport grown by `radius` map units. `None`
    /// if that area wraps around the antimeridian, in which case a box
    /// can't describe it.
    pub fn covering_bbox(&self, radius: f64) -> Option<BoundingBox> {
        let rect = self.rect.expanded(radius);
        if rect.wraps_antimeridian() {
            return None;
        }
        let (min_lng, max_lat) = utils::map_point_to_lng_lat(rect.x, rect.y.max(0.0));
        let (max_lng, min_lat) = utils::map_point_to_lng_lat(
            rect.x + rect.width,
            (rect.y + rect.height).min(MAP_WORLD_SIZE),
        );
        Some(BoundingBox {
            // everything past the mercator limit projects onto the edge
            min_lat: if rect.y + rect.height >= MAP_WORLD_SIZE {
                -90.0
            } else {
                min_lat
            },
            max_lat: if rect.y <= 0.0 { 90.0 } else { max_lat },
            min_lng,
            max_lng,
        })
    }

    /// (left, top, right, bottom) in lng/lat.
    pub fn lng_lat_bounds(&self) -> (f64, f64, f64, f64) {
        let (left, top) = utils::map_point_to_lng_lat(self.rect.x, self.rect.y);
        let (right, bottom) =
            utils::map_point_to_lng_lat(self.rect.x + self.rect.width, self.rect.y + self.rect.height);
        (left, top, right, bottom)
    }
}
