use crate::renderer::surface::RgbaColor;

pub const MIN_HEAT_ALPHA: f64 = 0.3;
pub const MAX_HEAT_ALPHA: f64 = 0.7;

/// Logarithmic visit-count scale. Counts are mapped to `[0, 1]` by
/// `(ln(count) - ln(min)) / (ln(max) - ln(min))`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeatScale {
    log_min: f64,
    log_range: f64,
}

impl HeatScale {
    pub fn from_counts(counts: impl IntoIterator<Item = u32>) -> Self {
        let (min, max) = counts
            .into_iter()
            .fold(None, |acc: Option<(u32, u32)>, count| match acc {
                None => Some((count, count)),
                Some((min, max)) => Some((min.min(count), max.max(count))),
            })
            .unwrap_or((1, 1));

        // A zero-width range would divide by zero: when every spot has the
        // same count, pretend the max is one higher.
        let safe_min = min.max(1);
        let safe_max = max.max(safe_min.saturating_add(1));

        let log_min = (safe_min as f64).ln();
        let log_max = (safe_max as f64).ln();
        Self {
            log_min,
            log_range: log_max - log_min,
        }
    }

    pub fn normalize(&self, visit_count: u32) -> f64 {
        if self.log_range <= 0.0 {
            return 0.0;
        }
        let log_visits = (visit_count.max(1) as f64).ln();
        ((log_visits - self.log_min) / self.log_range).clamp(0.0, 1.0)
    }
}

// blue -> cyan -> green -> yellow -> red, each segment moves one channel.
pub fn heat_color(normalized: f64) -> RgbaColor {
    let value = normalized.clamp(0.0, 1.0) as f32;
    if value < 0.25 {
        let t = value * 4.0;
        RgbaColor::rgb(0.0, t, 1.0)
    } else if value < 0.5 {
        let t = (value - 0.25) * 4.0;
        RgbaColor::rgb(0.0, 1.0, 1.0 - t)
    } else if value < 0.75 {
        let t = (value - 0.5) * 4.0;
        RgbaColor::rgb(t, 1.0, 0.0)
    } else {
        let t = (value - 0.75) * 4.0;
        RgbaColor::rgb(1.0, 1.0 - t, 0.0)
    }
}

/// Rarely visited spots are more see-through; capped so the map stays
/// readable under the most visited ones.
pub fn heat_alpha(normalized: f64) -> f32 {
    (MIN_HEAT_ALPHA + normalized * (MAX_HEAT_ALPHA - MIN_HEAT_ALPHA)).min(MAX_HEAT_ALPHA) as f32
}
