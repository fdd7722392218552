//! Run configuration: one immutable snapshot per classification run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::composite::Statistic;
use crate::error::{PipelineError, Result};
use crate::partition::HoldoutSplit;
use crate::season::{parse_windows, Seasons};
use crate::sensor::Sensor;

// ── Slider ranges ─────────────────────────────────────────────────────────────

pub const CLOUD_RANGE: (f64, f64) = (0.0, 100.0);
pub const TREES_RANGE: (usize, usize) = (10, 500);
pub const POINTS_RANGE: (usize, usize) = (100, 10_000);
pub const VALIDATION_RANGE: (f64, f64) = (10.0, 50.0);

/// User-facing run parameters. Every field has a default, so a partial JSON
/// file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Default `COPERNICUS/S2_SR`.
    pub sensor: Sensor,
    /// Baseline date the window offsets count from. Default 2021-01-01.
    pub base_date: NaiveDate,
    /// Month offsets, default `0,3:3,6:6,9:9,12`.
    pub seasons: Seasons,
    /// 0-100, default 30. Scenes must be strictly below this cloud cover.
    pub max_cloud_cover: f64,
    pub statistic: Statistic,
    /// 10-500, default 100.
    pub n_trees: usize,
    /// 100-10000, default 1400.
    pub training_points_per_class: usize,
    /// 10-50, default 30. Percentage of polygon parts held out.
    pub validation_percent: f64,
    pub training_seed: u64,
    pub validation_seed: u64,
    /// Seed of the per-part random value shared by both splits.
    pub partition_seed: u64,
    pub class_property: String,
    pub crs: String,
    /// Sampling/classification scale in metres; `None` = sensor resolution.
    pub scale: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sensor: Sensor::Sentinel2Sr,
            base_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or(NaiveDate::MIN),
            seasons: parse_windows("0,3:3,6:6,9:9,12").unwrap_or_default(),
            max_cloud_cover: 30.0,
            statistic: Statistic::Median,
            n_trees: 100,
            training_points_per_class: 1400,
            validation_percent: 30.0,
            training_seed: 7638,
            validation_seed: 2982,
            partition_seed: 0,
            class_property: "land_class".into(),
            crs: "EPSG:4326".into(),
            scale: None,
        }
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: RunConfig = serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("cannot parse run config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Range-check every slider and the base date against the sensor's
    /// archive start.
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64, (lo, hi): (f64, f64)| (lo..=hi).contains(&v);
        if !in_range(self.max_cloud_cover, CLOUD_RANGE) {
            return Err(PipelineError::config(format!(
                "cloud cover {} outside {CLOUD_RANGE:?}",
                self.max_cloud_cover
            )));
        }
        if !(TREES_RANGE.0..=TREES_RANGE.1).contains(&self.n_trees) {
            return Err(PipelineError::config(format!(
                "tree count {} outside {TREES_RANGE:?}",
                self.n_trees
            )));
        }
        if !(POINTS_RANGE.0..=POINTS_RANGE.1).contains(&self.training_points_per_class) {
            return Err(PipelineError::config(format!(
                "training points {} outside {POINTS_RANGE:?}",
                self.training_points_per_class
            )));
        }
        if !in_range(self.validation_percent, VALIDATION_RANGE) {
            return Err(PipelineError::config(format!(
                "validation percentage {} outside {VALIDATION_RANGE:?}",
                self.validation_percent
            )));
        }
        if self.seasons.is_empty() {
            return Err(PipelineError::config("at least one date window is required"));
        }
        if self.class_property.trim().is_empty() {
            return Err(PipelineError::config("class property name is empty"));
        }
        let start = self.sensor.profile().calendar_start;
        if self.base_date < start {
            return Err(PipelineError::config(format!(
                "{} imagery starts on {start}, base date {} is earlier",
                self.sensor, self.base_date
            )));
        }
        if self.scale.is_some_and(|s| s.is_nan() || s <= 0.0) {
            return Err(PipelineError::config("scale must be positive"));
        }
        Ok(())
    }

    /// `round(n_train × p / (100 − p))`.
    pub fn validation_points_per_class(&self) -> usize {
        let p = self.validation_percent;
        (self.training_points_per_class as f64 * p / (100.0 - p)).round() as usize
    }

    pub fn holdout(&self) -> HoldoutSplit {
        HoldoutSplit::new(self.partition_seed, self.validation_percent)
    }

    /// Effective scale in metres.
    pub fn resolution_m(&self) -> f64 {
        self.scale.unwrap_or_else(|| self.sensor.profile().resolution_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RunConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.seasons.len(), 4);
        assert_eq!(cfg.resolution_m(), 10.0);
    }

    #[test]
    fn validation_point_count() {
        let cfg = RunConfig::default();
        // 1400 · 30 / 70
        assert_eq!(cfg.validation_points_per_class(), 600);
        let cfg = RunConfig { training_points_per_class: 1000, validation_percent: 25.0, ..cfg };
        assert_eq!(cfg.validation_points_per_class(), 333);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = RunConfig::from_json_str(
            r#"{"sensor": "LANDSAT/LC08/C01/T1_SR", "n_trees": 50, "seasons": "0,6:6,12"}"#,
        )
        .unwrap();
        assert_eq!(cfg.sensor, Sensor::Landsat8Sr);
        assert_eq!(cfg.n_trees, 50);
        assert_eq!(cfg.seasons.len(), 2);
        assert_eq!(cfg.training_seed, 7638);
        assert_eq!(cfg.resolution_m(), 30.0);
    }

    #[test]
    fn out_of_range_sliders_are_rejected() {
        for cfg in [
            RunConfig { n_trees: 5, ..Default::default() },
            RunConfig { max_cloud_cover: 101.0, ..Default::default() },
            RunConfig { training_points_per_class: 50, ..Default::default() },
            RunConfig { validation_percent: 60.0, ..Default::default() },
            RunConfig { scale: Some(0.0), ..Default::default() },
        ] {
            assert!(matches!(cfg.validate(), Err(PipelineError::Configuration(_))));
        }
    }

    #[test]
    fn base_date_before_archive_is_rejected() {
        let cfg = RunConfig { base_date: "2016-06-01".parse().unwrap(), ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = RunConfig { sensor: Sensor::Landsat8Toa, ..cfg };
        assert!(cfg.validate().is_ok());
    }
}
