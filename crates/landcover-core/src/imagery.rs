//! Imagery source boundary.
//!
//! `ImagerySource` is the seam a remote backend implements. `ImageCatalog`
//! is the bundled in-memory source: a set of scenes already resampled onto
//! one shared grid, loadable from JSON.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo::{BoundingRect, Intersects, Polygon, Rect};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::raster::{Band, GridSpec};
use crate::sensor::Sensor;

/// One acquisition: spectral + QA bands on the catalog grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub date: NaiveDate,
    /// Image-level metadata, e.g. `CLOUDY_PIXEL_PERCENTAGE`.
    #[serde(default)]
    pub metadata: BTreeMap<String, f64>,
    /// Scene outline; `None` means the scene covers the whole grid.
    #[serde(default)]
    pub footprint: Option<Rect<f64>>,
    pub bands: Vec<Band>,
}

impl Image {
    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }
}

/// Query sent to an imagery source for one date window.
#[derive(Debug, Clone)]
pub struct ImageQuery<'a> {
    pub sensor: Sensor,
    /// Inclusive start.
    pub from: NaiveDate,
    /// Exclusive end.
    pub to: NaiveDate,
    pub region: &'a Polygon<f64>,
    /// Keep images whose cloud metadata is strictly below this percentage.
    pub max_cloud_cover: f64,
}

/// Anything that can answer an image query. Failures of the source itself
/// are reported as `PipelineError::Backend`.
pub trait ImagerySource {
    /// Grid every returned image is aligned to.
    fn grid(&self) -> GridSpec;

    fn images(&self, query: &ImageQuery<'_>) -> Result<Vec<Image>>;
}

/// In-memory scenes for one sensor on one grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCatalog {
    pub sensor: Sensor,
    pub grid: GridSpec,
    pub images: Vec<Image>,
}

impl ImageCatalog {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: ImageCatalog = serde_json::from_str(json)
            .map_err(|e| PipelineError::Backend(format!("cannot parse image catalog: {e}")))?;
        for image in &catalog.images {
            if let Some(band) = image.bands.iter().find(|b| b.data.len() != catalog.grid.len()) {
                return Err(PipelineError::Backend(format!(
                    "image {} band {} has {} pixels, catalog grid has {}",
                    image.id,
                    band.name,
                    band.data.len(),
                    catalog.grid.len()
                )));
            }
        }
        Ok(catalog)
    }

    fn grid_rect(&self) -> Rect<f64> {
        Rect::new(
            (self.grid.min_lon, self.grid.min_lat),
            (self.grid.max_lon, self.grid.max_lat),
        )
    }
}

impl ImagerySource for ImageCatalog {
    fn grid(&self) -> GridSpec {
        self.grid
    }

    fn images(&self, query: &ImageQuery<'_>) -> Result<Vec<Image>> {
        if query.sensor != self.sensor {
            return Err(PipelineError::config(format!(
                "catalog holds {} imagery, {} was requested",
                self.sensor, query.sensor
            )));
        }
        let cloud_key = query.sensor.profile().cloud_property;
        let region_bounds = query.region.bounding_rect();

        let selected: Vec<Image> = self
            .images
            .iter()
            .filter(|img| img.date >= query.from && img.date < query.to)
            // Missing cloud metadata never passes a `<` filter.
            .filter(|img| img.metadata.get(cloud_key).is_some_and(|&cc| cc < query.max_cloud_cover))
            .filter(|img| {
                let footprint = img.footprint.unwrap_or_else(|| self.grid_rect());
                region_bounds.is_some_and(|b| footprint.intersects(&b))
            })
            .cloned()
            .collect();

        debug!(
            "{}: {} of {} images between {} and {} under {}% cloud",
            self.sensor,
            selected.len(),
            self.images.len(),
            query.from,
            query.to,
            query.max_cloud_cover
        );
        Ok(selected)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::polygon;

    pub(crate) fn scene(id: &str, date: &str, cloud: f64, grid: GridSpec, value: f32, qa: f32) -> Image {
        let profile = Sensor::Landsat8Sr.profile();
        let mut bands: Vec<Band> = profile
            .bands
            .iter()
            .map(|b| Band::filled(*b, grid.len(), value))
            .collect();
        bands.push(Band::filled(profile.qa_band, grid.len(), qa));
        Image {
            id: id.into(),
            date: date.parse().unwrap(),
            metadata: BTreeMap::from([(profile.cloud_property.to_string(), cloud)]),
            footprint: None,
            bands,
        }
    }

    fn catalog() -> ImageCatalog {
        let grid = GridSpec::new(2, 2, 0.0, 1.0, 0.0, 1.0);
        ImageCatalog {
            sensor: Sensor::Landsat8Sr,
            grid,
            images: vec![
                scene("a", "2021-01-15", 10.0, grid, 100.0, 0.0),
                scene("b", "2021-02-15", 50.0, grid, 200.0, 0.0),
                scene("c", "2021-04-01", 5.0, grid, 300.0, 0.0),
            ],
        }
    }

    fn aoi() -> Polygon<f64> {
        polygon![(x: 0.1, y: 0.1), (x: 0.9, y: 0.1), (x: 0.9, y: 0.9), (x: 0.1, y: 0.9)]
    }

    #[test]
    fn filters_by_date_and_cloud() {
        let cat = catalog();
        let region = aoi();
        let q = ImageQuery {
            sensor: Sensor::Landsat8Sr,
            from: "2021-01-01".parse().unwrap(),
            to: "2021-04-01".parse().unwrap(),
            region: &region,
            max_cloud_cover: 30.0,
        };
        let ids: Vec<String> = cat.images(&q).unwrap().into_iter().map(|i| i.id).collect();
        // "b" is too cloudy, "c" falls on the exclusive end date.
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn footprint_outside_region_is_dropped() {
        let mut cat = catalog();
        cat.images[0].footprint = Some(Rect::new((5.0, 5.0), (6.0, 6.0)));
        let region = aoi();
        let q = ImageQuery {
            sensor: Sensor::Landsat8Sr,
            from: "2021-01-01".parse().unwrap(),
            to: "2022-01-01".parse().unwrap(),
            region: &region,
            max_cloud_cover: 100.0,
        };
        let ids: Vec<String> = cat.images(&q).unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn wrong_sensor_is_configuration_error() {
        let cat = catalog();
        let region = aoi();
        let q = ImageQuery {
            sensor: Sensor::Sentinel2Sr,
            from: "2021-01-01".parse().unwrap(),
            to: "2022-01-01".parse().unwrap(),
            region: &region,
            max_cloud_cover: 100.0,
        };
        assert!(matches!(cat.images(&q), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn catalog_json_rejects_misaligned_band() {
        let mut cat = catalog();
        cat.images[1].bands[0].data.pop();
        let json = serde_json::to_string(&cat).unwrap();
        assert!(matches!(ImageCatalog::from_json_str(&json), Err(PipelineError::Backend(_))));
    }
}
