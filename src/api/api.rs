use anyhow::Result;
use chrono::{Local, TimeZone};
use std::sync::Arc;

use crate::area_utils::{CoverageAggregator, CoverageStats, DailyCount};
use crate::config::EngineConfig;
use crate::gps_processor::{GpsProcessor, IngestOutcome, IngestSummary, LocationFix};
use crate::main_db::MainDb;
use crate::renderer::{CancelToken, OverlayMode, OverlayRasterizer, OverlayResult, Viewport};
use crate::spot_store::{SpotStore, StoreError};
use crate::visited_spot::Coordinate;

/// Everything the presentation layer talks to. All the parts share one
/// `SpotStore`, so an `Engine` can be used from several threads at once.
pub struct Engine<Tz: TimeZone = Local> {
    config: EngineConfig,
    store: Arc<SpotStore>,
    gps_processor: GpsProcessor,
    rasterizer: OverlayRasterizer,
    aggregator: CoverageAggregator<Tz>,
}

impl Engine<Local> {
    /// Calendar days are those of the device's time zone.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_timezone(config, Local)
    }
}

impl<Tz: TimeZone> Engine<Tz> {
    pub fn with_timezone(config: EngineConfig, tz: Tz) -> Result<Self> {
        config.validate()?;
        let store = match &config.database_path {
            Some(path) => {
                let db = MainDb::open(path)?;
                SpotStore::open(config.merge_delta_degrees, Box::new(db), config.persistence)?
            }
            None => {
                info!("[api] no database configured, spots are kept in memory only");
                SpotStore::in_memory(config.merge_delta_degrees)
            }
        };
        let store = Arc::new(store);
        let gps_processor = GpsProcessor::new(store.clone(), config.max_accuracy_meters);
        let rasterizer = OverlayRasterizer::new(store.clone(), &config);
        let aggregator = CoverageAggregator::new(store.clone(), tz);
        info!("[api] engine initialized with {} spots", store.len());
        Ok(Self {
            config,
            store,
            gps_processor,
            rasterizer,
            aggregator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SpotStore> {
        &self.store
    }

    /// Fixes are applied in the order given, see `GpsProcessor::handle_fixes`.
    pub fn on_location_update(&self, fixes: Vec<LocationFix>) -> IngestSummary {
        let summary = self.gps_processor.handle_fixes(&fixes);
        if summary.degraded > 0 {
            warn!(
                "[api] {} of {} fixes were not persisted",
                summary.degraded,
                fixes.len()
            );
        }
        summary
    }

    pub fn upsert_from_tap(&self, coordinate: Coordinate) -> IngestOutcome {
        self.gps_processor.handle_manual(coordinate)
    }

    pub fn render(&self, viewport: &Viewport, mode: OverlayMode) -> OverlayResult {
        self.rasterizer.render(viewport, mode)
    }

    pub fn render_default(&self, viewport: &Viewport) -> OverlayResult {
        self.render(viewport, self.config.default_mode)
    }

    pub fn render_with_cancel(
        &self,
        viewport: &Viewport,
        mode: OverlayMode,
        cancel: &CancelToken,
    ) -> Option<OverlayResult> {
        self.rasterizer.render_with_cancel(viewport, mode, cancel)
    }

    pub fn render_png(&self, viewport: &Viewport, mode: OverlayMode) -> Result<Vec<u8>> {
        self.render(viewport, mode).encode_png()
    }

    pub fn coverage_stats(&self) -> CoverageStats {
        self.aggregator.coverage_stats()
    }

    pub fn trend_series(&self) -> Vec<DailyCount> {
        self.aggregator.trend_series()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn take_write_failures(&self) -> Vec<StoreError> {
        self.store.take_write_failures()
    }

    pub fn dropped_write_failures(&self) -> usize {
        self.store.dropped_write_failures()
    }
}
