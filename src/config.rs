use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::renderer::OverlayMode;

// ~55m at the equator.
pub const DEFAULT_MERGE_DELTA_DEGREES: f64 = 0.0005;
pub const DEFAULT_MAX_ACCURACY_METERS: f64 = 50.0;
// In map units, see `utils::MAP_WORLD_SIZE`.
pub const DEFAULT_CLEAR_RADIUS: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Write on the calling thread once the in-memory update is done.
    Immediate,
    /// Queue writes to a background writer thread.
    WriteBehind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub merge_delta_degrees: f64,
    pub max_accuracy_meters: f64,
    pub clear_radius: f64,
    pub fog_color: [u8; 4],
    pub noise_texture: bool,
    pub default_mode: OverlayMode,
    pub persistence: PersistenceMode,
    pub database_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            merge_delta_degrees: DEFAULT_MERGE_DELTA_DEGREES,
            max_accuracy_meters: DEFAULT_MAX_ACCURACY_METERS,
            clear_radius: DEFAULT_CLEAR_RADIUS,
            fog_color: [0, 0, 0, 255],
            noise_texture: false,
            default_mode: OverlayMode::Fog,
            persistence: PersistenceMode::Immediate,
            database_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_json_str(&content).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.merge_delta_degrees > 0.0 && self.merge_delta_degrees.is_finite()) {
            bail!(
                "merge_delta_degrees must be positive, got {}",
                self.merge_delta_degrees
            );
        }
        if !(self.max_accuracy_meters > 0.0) {
            bail!(
                "max_accuracy_meters must be positive, got {}",
                self.max_accuracy_meters
            );
        }
        if !(self.clear_radius > 0.0 && self.clear_radius.is_finite()) {
            bail!("clear_radius must be positive, got {}", self.clear_radius);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.merge_delta_degrees, DEFAULT_MERGE_DELTA_DEGREES);
        assert_eq!(config.max_accuracy_meters, DEFAULT_MAX_ACCURACY_METERS);
        assert_eq!(config.default_mode, OverlayMode::Fog);
        assert_eq!(config.persistence, PersistenceMode::Immediate);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn parses_overrides() {
        let config = EngineConfig::from_json_str(
            r#"{"default_mode": "heat", "persistence": "write_behind", "database_path": "/tmp/x.db", "clear_radius": 300}"#,
        )
        .unwrap();
        assert_eq!(config.default_mode, OverlayMode::Heat);
        assert_eq!(config.persistence, PersistenceMode::WriteBehind);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.clear_radius, 300.0);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(EngineConfig::from_json_str(r#"{"default_mode": "satellite"}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"merge_delta_degrees": 0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"clear_radius": -1}"#).is_err());
    }
}
