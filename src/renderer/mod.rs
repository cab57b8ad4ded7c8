use serde::Deserialize;

pub mod heat;
pub mod overlay_renderer;
pub use overlay_renderer::{
    CancelToken, FogMask, HeatBlob, HeatLayer, OverlayRasterizer, OverlayResult,
};

pub mod surface;
pub use surface::{DrawingSurface, PixmapSurface, RgbaColor};

pub mod viewport;
pub use viewport::{MapRect, Viewport};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverlayMode {
    /// Opaque layer with a hole around every visited spot.
    Fog,
    /// One colored circle per spot, colored by visit frequency.
    Heat,
}
