use anyhow::Result;
use tiny_skia::{BlendMode, Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

/// Straight (not premultiplied) color, every channel in `[0, 1]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RgbaColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl RgbaColor {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self {
            r: rgba[0] as f32 / 255.0,
            g: rgba[1] as f32 / 255.0,
            b: rgba[2] as f32 / 255.0,
            a: rgba[3] as f32 / 255.0,
        }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    fn to_skia(self) -> Option<Color> {
        Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
    }
}

/// The three drawing primitives overlays are made of. Coordinates are in
/// pixels, origin at the top-left corner.
pub trait DrawingSurface {
    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: RgbaColor);

    /// Makes everything inside the circle fully transparent.
    fn cut_circle(&mut self, cx: f32, cy: f32, radius: f32);

    /// Paints the circle with `color`, replacing (not blending with) what
    /// is already there.
    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: RgbaColor);
}

pub struct PixmapSurface {
    pixmap: Pixmap,
}

impl PixmapSurface {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("Invalid pixmap size: {}x{}", width, height))?;
        Ok(Self { pixmap })
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        Ok(self.pixmap.encode_png()?)
    }

    fn fill_circle_with(&mut self, cx: f32, cy: f32, radius: f32, paint: &Paint) {
        // `None` for degenerate circles (zero/negative radius), nothing to draw.
        if let Some(path) = PathBuilder::from_circle(cx, cy, radius) {
            self.pixmap
                .fill_path(&path, paint, FillRule::Winding, Transform::identity(), None);
        }
    }
}

impl DrawingSurface for PixmapSurface {
    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: RgbaColor) {
        let (Some(rect), Some(color)) = (Rect::from_xywh(x, y, width, height), color.to_skia())
        else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(color);
        paint.anti_alias = false;
        self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }

    fn cut_circle(&mut self, cx: f32, cy: f32, radius: f32) {
        let mut paint = Paint::default();
        paint.set_color(Color::BLACK);
        paint.anti_alias = true;
        paint.blend_mode = BlendMode::DestinationOut;
        self.fill_circle_with(cx, cy, radius, &paint);
    }

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: RgbaColor) {
        let Some(color) = color.to_skia() else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(color);
        paint.anti_alias = true;
        paint.blend_mode = BlendMode::Source;
        self.fill_circle_with(cx, cy, radius, &paint);
    }
}
