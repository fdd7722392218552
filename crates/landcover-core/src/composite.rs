//! Temporal composite builder.
//!
//! One band group per date window (cloud-filtered, masked, reduced per
//! pixel), then the terrain group, then any optional context bands.
//! Band order is fixed by (sensor bands × window index) so a classifier
//! trained on one stack can be applied to the same stack.

use geo::Polygon;
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::{PipelineError, Result};
use crate::imagery::{ImageQuery, ImagerySource};
use crate::mask::mask_image;
use crate::raster::{Band, GridSpec, Raster};
use crate::season::Seasons;
use crate::sensor::{Sensor, SensorProfile};
use crate::terrain::to_int16;

/// Per-pixel reducer over a window's image time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Mean,
    #[default]
    Median,
}

impl Statistic {
    /// Reduce the non-NaN values; `None` when all are NaN.
    pub fn reduce(self, values: &mut Vec<f32>) -> Option<f32> {
        values.retain(|v| !v.is_nan());
        if values.is_empty() {
            return None;
        }
        match self {
            Statistic::Mean => {
                let sum: f64 = values.iter().map(|&v| v as f64).sum();
                Some((sum / values.len() as f64) as f32)
            }
            Statistic::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let n = values.len();
                Some(if n % 2 == 1 {
                    values[n / 2]
                } else {
                    (values[n / 2 - 1] + values[n / 2]) / 2.0
                })
            }
        }
    }
}

impl std::str::FromStr for Statistic {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Statistic::Mean),
            "median" => Ok(Statistic::Median),
            other => Err(PipelineError::config(format!("unknown statistic {other:?}, expected mean or median"))),
        }
    }
}

/// Band name for window `index` (0-based): unsuffixed for the first window,
/// `<band>_<index>` afterwards.
pub fn window_band_name(band: &str, index: usize) -> String {
    if index == 0 {
        band.to_string()
    } else {
        format!("{band}_{index}")
    }
}

/// The multi-band predictor raster for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeStack {
    pub sensor: Sensor,
    pub raster: Raster,
}

impl CompositeStack {
    pub fn grid(&self) -> GridSpec {
        self.raster.grid
    }

    pub fn band_names(&self) -> Vec<String> {
        self.raster.band_names()
    }
}

/// Builds a `CompositeStack` from a sensor profile and a set of windows.
pub struct CompositeBuilder<'a> {
    profile: SensorProfile,
    bands: Vec<&'static str>,
    max_cloud_cover: f64,
    statistic: Statistic,
    context: Vec<&'a Raster>,
}

impl<'a> CompositeBuilder<'a> {
    pub fn new(sensor: Sensor, max_cloud_cover: f64, statistic: Statistic) -> Self {
        let profile = sensor.profile();
        Self {
            bands: profile.bands.to_vec(),
            profile,
            max_cloud_cover,
            statistic,
            context: Vec::new(),
        }
    }

    /// Restrict the spectral bands to a subset of the sensor's bands.
    pub fn with_bands(mut self, bands: Vec<&'static str>) -> Self {
        self.bands = bands;
        self
    }

    /// Extra predictor layers (distance to road, soil type, ...) appended
    /// after the terrain group. Resampled to the composite grid.
    pub fn with_context_band(mut self, layer: &'a Raster) -> Self {
        self.context.push(layer);
        self
    }

    /// Build the stack.
    ///
    /// `terrain` is the output of `terrain::terrain_bands` on any grid; it is
    /// resampled (nearest) onto the imagery grid.
    pub fn build(
        &self,
        imagery: &dyn ImagerySource,
        aoi: &Polygon<f64>,
        seasons: &Seasons,
        baseline: chrono::NaiveDate,
        terrain: &Raster,
    ) -> Result<CompositeStack> {
        if seasons.is_empty() {
            return Err(PipelineError::config("composite needs at least one date window"));
        }
        if self.bands.is_empty() {
            return Err(PipelineError::config("composite needs at least one spectral band"));
        }
        if let Some(b) = self.bands.iter().find(|b| !self.profile.bands.contains(*b)) {
            return Err(PipelineError::config(format!(
                "band {b} is not available for {}",
                self.profile.sensor
            )));
        }

        let grid = imagery.grid();
        let mut raster = Raster::new(grid);

        for (index, (from, to)) in seasons.date_ranges(baseline)?.into_iter().enumerate() {
            let query = ImageQuery {
                sensor: self.profile.sensor,
                from,
                to,
                region: aoi,
                max_cloud_cover: self.max_cloud_cover,
            };
            let images = imagery.images(&query)?;
            info!("period {}: {} images from {} to {}", index + 1, images.len(), from, to);
            if images.is_empty() {
                warn!("period {}: no images under {}% cloud, bands will be zero", index + 1, self.max_cloud_cover);
            }

            let masked: Vec<Vec<Band>> = images
                .iter()
                .map(|img| mask_image(img, &self.profile, &self.bands))
                .collect::<Result<_>>()?;
            for (img, bands) in images.iter().zip(&masked) {
                if let Some(b) = bands.iter().find(|b| b.data.len() != grid.len()) {
                    return Err(PipelineError::Backend(format!(
                        "image {} band {} has {} pixels, grid has {}",
                        img.id,
                        b.name,
                        b.data.len(),
                        grid.len()
                    )));
                }
            }

            for (bi, band) in self.bands.iter().enumerate() {
                let series: Vec<&[f32]> = masked.iter().map(|m| m[bi].data.as_slice()).collect();
                let data = self.reduce_series(&series, grid.len());
                raster.push_band(Band::new(window_band_name(band, index), data));
            }
        }

        for band in terrain.resample_nearest(grid, 0.0).bands {
            raster.push_band(band);
        }
        for layer in &self.context {
            for band in layer.resample_nearest(grid, 0.0).bands {
                raster.push_band(band);
            }
        }

        Ok(CompositeStack { sensor: self.profile.sensor, raster })
    }

    /// Reduce, unmask (no-data → 0), rescale and cast one band.
    fn reduce_series(&self, series: &[&[f32]], len: usize) -> Vec<f32> {
        let stat = self.statistic;
        let multiplier = self.profile.composite_multiplier;
        let pixel = |i: usize| {
            let mut values: Vec<f32> = series.iter().map(|s| s[i]).collect();
            let v = stat.reduce(&mut values).unwrap_or(0.0);
            to_int16(v * multiplier)
        };

        #[cfg(feature = "threading")]
        let data = (0..len).into_par_iter().map(pixel).collect();
        #[cfg(not(feature = "threading"))]
        let data = (0..len).map(pixel).collect();
        data
    }
}
