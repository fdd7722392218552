//! User-digitised layers: the AOI polygon and labelled training features.

use std::collections::BTreeMap;
use std::str::FromStr;

use geo::{Centroid, GeodesicArea, Geometry, Polygon};
use geojson::{GeoJson, JsonObject, JsonValue};
use log::info;
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Layer name that marks the area of interest.
pub const AOI_NAME: &str = "aoi";

/// Integer class id carried by training features (≥ 1).
pub type ClassId = u32;

const MISSING_AOI: &str =
    "Draw a rectangle polygon and name it \"aoi\" to define the Area of Interest";

/// One digitised layer.
#[derive(Debug, Clone)]
pub struct FeatureLayer {
    pub name: String,
    pub color: Option<String>,
    pub geometry: Geometry<f64>,
    pub properties: JsonObject,
}

impl FeatureLayer {
    pub fn new(name: impl Into<String>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            name: name.into(),
            color: None,
            geometry: geometry.into(),
            properties: JsonObject::new(),
        }
    }

    pub fn with_class(mut self, property: &str, class_id: i64) -> Self {
        self.properties.insert(property.to_string(), JsonValue::from(class_id));
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn is_aoi(&self) -> bool {
        self.name == AOI_NAME
    }

    /// Class id under `property`. A missing, non-integer or non-positive
    /// value is a configuration error naming the layer.
    pub fn class_id(&self, property: &str) -> Result<ClassId> {
        let value = self.properties.get(property).and_then(JsonValue::as_i64);
        match value {
            Some(v) if v >= 1 && v <= ClassId::MAX as i64 => Ok(v as ClassId),
            _ => Err(PipelineError::config(format!(
                "layer {:?}: digitise features with an integer class property {property:?} (>= 1)",
                self.name
            ))),
        }
    }
}

/// All layers drawn by the user, in drawing order.
#[derive(Debug, Clone, Default)]
pub struct LayerSet {
    pub layers: Vec<FeatureLayer>,
}

impl LayerSet {
    pub fn new(layers: Vec<FeatureLayer>) -> Self {
        Self { layers }
    }

    /// Read a GeoJSON FeatureCollection. The layer name comes from the
    /// `name` property, the display colour from `color`.
    pub fn from_geojson_str(s: &str) -> Result<Self> {
        let features = match GeoJson::from_str(s)? {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(f) => vec![f],
            GeoJson::Geometry(_) => {
                return Err(PipelineError::config("expected a FeatureCollection of named layers"))
            }
        };

        let mut layers = Vec::with_capacity(features.len());
        for (i, feature) in features.into_iter().enumerate() {
            let properties = feature.properties.unwrap_or_default();
            let name = properties
                .get("name")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("layer_{}", i + 1));
            let color = properties.get("color").and_then(JsonValue::as_str).map(str::to_string);
            let Some(geometry) = feature.geometry else {
                return Err(PipelineError::config(format!("layer {name:?} has no geometry")));
            };
            let geometry = Geometry::<f64>::try_from(geometry)?;
            layers.push(FeatureLayer { name, color, geometry, properties });
        }
        Ok(Self { layers })
    }

    /// The first layer named `aoi`, which must be a polygon.
    pub fn aoi(&self) -> Result<&Polygon<f64>> {
        let layer = self
            .layers
            .iter()
            .find(|l| l.is_aoi())
            .ok_or_else(|| PipelineError::config(MISSING_AOI))?;
        match &layer.geometry {
            Geometry::Polygon(p) if p.exterior().0.len() >= 4 => Ok(p),
            _ => Err(PipelineError::config(format!("{MISSING_AOI} (the \"aoi\" layer must be a single polygon)"))),
        }
    }

    /// Every layer except the AOI.
    pub fn training_layers(&self) -> impl Iterator<Item = &FeatureLayer> {
        self.layers.iter().filter(|l| !l.is_aoi())
    }

    /// Class id → (name, colour) for the renderer's legend/palette.
    /// Layers without a valid class id are skipped.
    pub fn legend(&self, property: &str) -> Legend {
        let mut entries = BTreeMap::new();
        for layer in self.training_layers() {
            if let Ok(class_id) = layer.class_id(property) {
                entries.entry(class_id).or_insert_with(|| LegendEntry {
                    class_id,
                    name: layer.name.clone(),
                    color: layer.color.clone().unwrap_or_else(|| "#000000".into()),
                });
            }
        }
        Legend { entries: entries.into_values().collect() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub class_id: ClassId,
    pub name: String,
    pub color: String,
}

/// Legend rows sorted by class id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub entries: Vec<LegendEntry>,
}

/// AOI centroid and geodesic area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AoiSummary {
    pub centroid_lon: f64,
    pub centroid_lat: f64,
    pub area_km2: f64,
}

impl AoiSummary {
    pub fn of(aoi: &Polygon<f64>) -> Self {
        let c = aoi.centroid().map(|p| (p.x(), p.y())).unwrap_or((f64::NAN, f64::NAN));
        let summary = Self {
            centroid_lon: c.0,
            centroid_lat: c.1,
            area_km2: (aoi.geodesic_area_unsigned() / 1.0e6).round(),
        };
        info!(
            "AOI centroid = ({:.5}, {:.5}), area = {} km2",
            summary.centroid_lon, summary.centroid_lat, summary.area_km2
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    const FC: &str = r##"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"name": "aoi"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": {"name": "water", "color": "#0000ff", "land_class": 2},
             "geometry": {"type": "MultiPolygon", "coordinates": [
                [[[0.1,0.1],[0.2,0.1],[0.2,0.2],[0.1,0.2],[0.1,0.1]]],
                [[[0.5,0.5],[0.6,0.5],[0.6,0.6],[0.5,0.6],[0.5,0.5]]]]}},
            {"type": "Feature", "properties": {"name": "forest", "color": "#00ff00", "land_class": 1},
             "geometry": {"type": "Polygon", "coordinates": [[[0.7,0.7],[0.8,0.7],[0.8,0.8],[0.7,0.8],[0.7,0.7]]]}}
        ]
    }"##;

    #[test]
    fn reads_layers_from_geojson() {
        let set = LayerSet::from_geojson_str(FC).unwrap();
        assert_eq!(set.layers.len(), 3);
        assert!(set.aoi().is_ok());
        let names: Vec<&str> = set.training_layers().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["water", "forest"]);
        assert_eq!(set.layers[1].class_id("land_class").unwrap(), 2);
    }

    #[test]
    fn missing_aoi_is_configuration_error() {
        let set = LayerSet::new(vec![FeatureLayer::new(
            "water",
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
        )]);
        assert!(matches!(set.aoi(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn missing_class_property_names_the_layer() {
        let layer = FeatureLayer::new("scrub", polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]);
        let msg = layer.class_id("land_class").unwrap_err().to_string();
        assert!(msg.contains("scrub") && msg.contains("integer class property"));
        assert!(layer.clone().with_class("land_class", 0).class_id("land_class").is_err());
    }

    #[test]
    fn legend_is_sorted_by_class() {
        let set = LayerSet::from_geojson_str(FC).unwrap();
        let legend = set.legend("land_class");
        assert_eq!(legend.entries.len(), 2);
        assert_eq!(legend.entries[0].name, "forest");
        assert_eq!(legend.entries[1].color, "#0000ff");
    }

    #[test]
    fn aoi_summary_area_is_plausible() {
        // 0.1° × 0.1° at the equator ≈ 11.1 km × 11.1 km.
        let aoi = polygon![(x: 0.0, y: 0.0), (x: 0.1, y: 0.0), (x: 0.1, y: 0.1), (x: 0.0, y: 0.1)];
        let s = AoiSummary::of(&aoi);
        assert!((s.area_km2 - 123.0).abs() <= 2.0, "area {}", s.area_km2);
        assert!((s.centroid_lon - 0.05).abs() < 1e-9);
    }
}
