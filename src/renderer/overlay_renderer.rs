use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tiny_skia::Pixmap;

use crate::config::EngineConfig;
use crate::renderer::heat::{heat_alpha, heat_color, HeatScale};
use crate::renderer::surface::{DrawingSurface, PixmapSurface, RgbaColor};
use crate::renderer::viewport::Viewport;
use crate::renderer::OverlayMode;
use crate::spot_store::SpotStore;
use crate::visited_spot::VisitedSpot;

// Noise is cosmetic: a faint grain on top of the fog.
const NOISE_CELL_SIZE: u32 = 4;
const NOISE_ALPHA: f32 = 0.1;
const NOISE_SEED: u64 = 0x666f_676d_6170;

// How many spots we process between two looks at the cancel flag.
const CANCEL_CHECK_INTERVAL: usize = 256;

// Anything larger is almost certainly a bogus viewport.
const MAX_PIXMAP_SIZE: u32 = 8192;

/// Lets a caller give up on a render that is no longer needed (e.g. the
/// map moved).
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FogMask {
    pub width: u32,
    pub height: u32,
    pub fog_color: RgbaColor,
    pub noise_texture: bool,
    pub radius: f32,
    /// Pixel centers of the cleared circles.
    pub cutouts: Vec<(f32, f32)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeatBlob {
    pub x: f32,
    pub y: f32,
    pub visit_count: u32,
    pub normalized: f64,
    /// Color with the blob's alpha applied.
    pub color: RgbaColor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeatLayer {
    pub width: u32,
    pub height: u32,
    pub radius: f32,
    /// In draw order, least visited first.
    pub blobs: Vec<HeatBlob>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OverlayResult {
    Fog(FogMask),
    Heat(HeatLayer),
}

impl OverlayResult {
    pub fn mode(&self) -> OverlayMode {
        match self {
            OverlayResult::Fog(_) => OverlayMode::Fog,
            OverlayResult::Heat(_) => OverlayMode::Heat,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            OverlayResult::Fog(fog) => (fog.width, fog.height),
            OverlayResult::Heat(heat) => (heat.width, heat.height),
        }
    }

    /// Replays the overlay onto `surface`, which must be at least
    /// `size()` big and (for heat) transparent.
    pub fn draw<S: DrawingSurface + ?Sized>(&self, surface: &mut S) {
        match self {
            OverlayResult::Fog(fog) => {
                let (width, height) = (fog.width as f32, fog.height as f32);
                surface.fill_rect(0.0, 0.0, width, height, fog.fog_color);
                if fog.noise_texture {
                    draw_noise(surface, fog.width, fog.height);
                }
                for (x, y) in &fog.cutouts {
                    surface.cut_circle(*x, *y, fog.radius);
                }
            }
            OverlayResult::Heat(heat) => {
                for blob in &heat.blobs {
                    surface.fill_circle(blob.x, blob.y, heat.radius, blob.color);
                }
            }
        }
    }

    pub fn to_pixmap(&self) -> Result<Pixmap> {
        let (width, height) = self.size();
        if width > MAX_PIXMAP_SIZE || height > MAX_PIXMAP_SIZE {
            bail!("Overlay too large: {}x{}", width, height);
        }
        let mut surface = PixmapSurface::new(width, height)?;
        self.draw(&mut surface);
        Ok(surface.into_pixmap())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        Ok(self.to_pixmap()?.encode_png()?)
    }
}

fn draw_noise<S: DrawingSurface + ?Sized>(surface: &mut S, width: u32, height: u32) {
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    let cell = NOISE_CELL_SIZE as f32;
    for y in (0..height).step_by(NOISE_CELL_SIZE as usize) {
        for x in (0..width).step_by(NOISE_CELL_SIZE as usize) {
            let gray: f32 = rng.random();
            surface.fill_rect(
                x as f32,
                y as f32,
                cell,
                cell,
                RgbaColor::rgb(gray, gray, gray).with_alpha(NOISE_ALPHA),
            );
        }
    }
}

fn cancelled(cancel: Option<&CancelToken>, i: usize) -> bool {
    i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(|c| c.is_cancelled())
}

pub struct OverlayRasterizer {
    store: Arc<SpotStore>,
    clear_radius: f64,
    fog_color: RgbaColor,
    noise_texture: bool,
}

impl OverlayRasterizer {
    pub fn new(store: Arc<SpotStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            clear_radius: config.clear_radius,
            fog_color: RgbaColor::from_rgba8(config.fog_color),
            noise_texture: config.noise_texture,
        }
    }

    pub fn render(&self, viewport: &Viewport, mode: OverlayMode) -> OverlayResult {
        self.render_inner(viewport, mode, None)
            .expect("a render without cancel token always completes")
    }

    /// `None` if `cancel` fired before the overlay was done.
    pub fn render_with_cancel(
        &self,
        viewport: &Viewport,
        mode: OverlayMode,
        cancel: &CancelToken,
    ) -> Option<OverlayResult> {
        self.render_inner(viewport, mode, Some(cancel))
    }

    fn render_inner(
        &self,
        viewport: &Viewport,
        mode: OverlayMode,
        cancel: Option<&CancelToken>,
    ) -> Option<OverlayResult> {
        let start = Instant::now();
        let result = match mode {
            OverlayMode::Fog => {
                // Only spots near the viewport can clear anything in it.
                let spots = match viewport.covering_bbox(self.clear_radius) {
                    Some(bbox) => self.store.query(&bbox),
                    None => self.store.snapshot(),
                };
                self.render_fog(&spots, viewport, cancel)
                    .map(OverlayResult::Fog)
            }
            // The color scale depends on every spot, not just the visible ones.
            OverlayMode::Heat => self
                .render_heat(&self.store.snapshot(), viewport, cancel)
                .map(OverlayResult::Heat),
        };
        debug!(
            "[overlay_renderer] {} render took {:?}, cancelled={}",
            mode,
            start.elapsed(),
            result.is_none()
        );
        result
    }

    pub fn render_fog(
        &self,
        spots: &[VisitedSpot],
        viewport: &Viewport,
        cancel: Option<&CancelToken>,
    ) -> Option<FogMask> {
        let (width, height) = viewport.pixel_size();
        let mut cutouts = Vec::new();
        for (i, spot) in spots.iter().enumerate() {
            if cancelled(cancel, i) {
                return None;
            }
            cutouts.extend(viewport.project_with_radius(&spot.coordinate, self.clear_radius));
        }
        Some(FogMask {
            width,
            height,
            fog_color: self.fog_color,
            noise_texture: self.noise_texture,
            radius: (self.clear_radius * viewport.zoom_scale) as f32,
            cutouts,
        })
    }

    pub fn render_heat(
        &self,
        spots: &[VisitedSpot],
        viewport: &Viewport,
        cancel: Option<&CancelToken>,
    ) -> Option<HeatLayer> {
        let (width, height) = viewport.pixel_size();
        let scale = HeatScale::from_counts(spots.iter().map(|spot| spot.visit_count));

        // Stable sort: spots with equal counts keep insertion order, the
        // most visited end up on top.
        let mut sorted: Vec<&VisitedSpot> = spots.iter().collect();
        sorted.sort_by_key(|spot| spot.visit_count);

        let mut blobs = Vec::new();
        for (i, spot) in sorted.into_iter().enumerate() {
            if cancelled(cancel, i) {
                return None;
            }
            let normalized = scale.normalize(spot.visit_count);
            let color = heat_color(normalized).with_alpha(heat_alpha(normalized));
            for (x, y) in viewport.project_with_radius(&spot.coordinate, self.clear_radius) {
                blobs.push(HeatBlob {
                    x,
                    y,
                    visit_count: spot.visit_count,
                    normalized,
                    color,
                });
            }
        }
        Some(HeatLayer {
            width,
            height,
            radius: (self.clear_radius * viewport.zoom_scale) as f32,
            blobs,
        })
    }
}
