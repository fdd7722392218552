//! Sensor capability lookup.
//!
//! Every per-sensor constant (bands, QA bits, resolution, rescale multiplier,
//! display defaults) lives in one `SensorProfile` record. Stages look the
//! record up once instead of matching on the sensor again.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Supported image collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sensor {
    Sentinel2Toa,
    Sentinel2Sr,
    Landsat8Toa,
    Landsat8Sr,
}

impl Sensor {
    pub const ALL: [Sensor; 4] = [
        Sensor::Sentinel2Toa,
        Sensor::Sentinel2Sr,
        Sensor::Landsat8Toa,
        Sensor::Landsat8Sr,
    ];

    /// Collection identifier as used by the imagery backend.
    pub fn collection_id(self) -> &'static str {
        match self {
            Sensor::Sentinel2Toa => "COPERNICUS/S2",
            Sensor::Sentinel2Sr => "COPERNICUS/S2_SR",
            Sensor::Landsat8Toa => "LANDSAT/LC08/C01/T1_TOA",
            Sensor::Landsat8Sr => "LANDSAT/LC08/C01/T1_SR",
        }
    }

    pub fn profile(self) -> SensorProfile {
        const S2_BANDS: &[&str] = &["B2", "B3", "B4", "B5", "B6", "B7", "B8", "B11", "B12"];
        const L8_BANDS: &[&str] = &["B2", "B3", "B4", "B5", "B6", "B7"];

        match self {
            Sensor::Sentinel2Toa | Sensor::Sentinel2Sr => SensorProfile {
                sensor: self,
                bands: S2_BANDS,
                qa_band: "QA60",
                // Bits 10 and 11: opaque cloud and cirrus.
                qa_mask_bits: &[10, 11],
                cloud_property: "CLOUDY_PIXEL_PERCENTAGE",
                reflectance_divisor: Some(10_000.0),
                composite_multiplier: 1000.0,
                resolution_m: 10.0,
                calendar_start: ymd(2017, 1, 1),
                display: DisplayDefaults { min: 0.0, max: 500.0, gamma: [0.95, 1.1, 1.0] },
            },
            Sensor::Landsat8Toa => SensorProfile {
                sensor: self,
                bands: L8_BANDS,
                qa_band: "BQA",
                // Bit 4: cloud.
                qa_mask_bits: &[4],
                cloud_property: "CLOUD_COVER",
                reflectance_divisor: None,
                composite_multiplier: 1000.0,
                resolution_m: 30.0,
                calendar_start: ymd(2014, 1, 1),
                display: DisplayDefaults { min: 0.0, max: 400.0, gamma: [0.95, 1.1, 1.0] },
            },
            Sensor::Landsat8Sr => SensorProfile {
                sensor: self,
                bands: L8_BANDS,
                qa_band: "pixel_qa",
                // Bits 3 and 5: cloud shadow and cloud.
                qa_mask_bits: &[3, 5],
                cloud_property: "CLOUD_COVER",
                reflectance_divisor: None,
                composite_multiplier: 1.0,
                resolution_m: 30.0,
                calendar_start: ymd(2014, 1, 1),
                display: DisplayDefaults { min: 0.0, max: 4000.0, gamma: [0.95, 1.1, 1.0] },
            },
        }
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    // Constant dates above are all valid.
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection_id())
    }
}

impl FromStr for Sensor {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sensor::ALL
            .into_iter()
            .find(|sensor| sensor.collection_id() == s.trim())
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "unknown image collection {s:?}; choose one of {}",
                    Sensor::ALL.map(Sensor::collection_id).join(", ")
                ))
            })
    }
}

impl TryFrom<String> for Sensor {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Sensor> for String {
    fn from(sensor: Sensor) -> Self {
        sensor.collection_id().to_string()
    }
}

/// Stretch applied by the renderer to an RGB preview of one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayDefaults {
    pub min: f32,
    pub max: f32,
    pub gamma: [f32; 3],
}

/// RGB preview parameters for one date window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VizParams {
    pub bands: [String; 3],
    pub min: f32,
    pub max: f32,
    pub gamma: [f32; 3],
}

/// Everything a stage needs to know about one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorProfile {
    pub sensor: Sensor,
    /// Spectral bands fed to the composite, in stack order.
    pub bands: &'static [&'static str],
    pub qa_band: &'static str,
    /// QA bits that must all be zero for a pixel to be kept.
    pub qa_mask_bits: &'static [u32],
    /// Image-level metadata key holding the cloud-cover percentage.
    pub cloud_property: &'static str,
    /// Applied after masking to bring raw digital numbers to reflectance.
    pub reflectance_divisor: Option<f32>,
    /// Fixed-point multiplier applied before the 16-bit cast.
    pub composite_multiplier: f32,
    /// Native pixel size in metres, also the default output scale.
    pub resolution_m: f64,
    /// First date with imagery in the collection.
    pub calendar_start: NaiveDate,
    pub display: DisplayDefaults,
}

impl SensorProfile {
    /// Combined QA bitmask; a pixel is valid iff `qa & mask == 0`.
    pub fn qa_bitmask(&self) -> u32 {
        self.qa_mask_bits.iter().fold(0u32, |acc, bit| acc | (1 << bit))
    }

    /// True-colour preview for window `index` (0-based).
    pub fn viz_params(&self, index: usize) -> VizParams {
        let name = |b: &str| crate::composite::window_band_name(b, index);
        VizParams {
            bands: [name("B4"), name("B3"), name("B2")],
            min: self.display.min,
            max: self.display.max,
            gamma: self.display.gamma,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_collection_ids() {
        for sensor in Sensor::ALL {
            assert_eq!(sensor.collection_id().parse::<Sensor>().unwrap(), sensor);
        }
    }

    #[test]
    fn unknown_collection_is_configuration_error() {
        let err = "MODIS/006/MOD09GA".parse::<Sensor>().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn qa_bitmasks_match_documented_bits() {
        assert_eq!(Sensor::Sentinel2Sr.profile().qa_bitmask(), (1 << 10) | (1 << 11));
        assert_eq!(Sensor::Landsat8Toa.profile().qa_bitmask(), 1 << 4);
        assert_eq!(Sensor::Landsat8Sr.profile().qa_bitmask(), (1 << 3) | (1 << 5));
    }

    #[test]
    fn viz_params_suffix_later_windows() {
        let p = Sensor::Landsat8Sr.profile();
        assert_eq!(p.viz_params(0).bands, ["B4", "B3", "B2"].map(String::from));
        assert_eq!(p.viz_params(2).bands, ["B4_2", "B3_2", "B2_2"].map(String::from));
        assert_eq!(p.viz_params(0).max, 4000.0);
    }

    #[test]
    fn sensor_serde_uses_collection_id() {
        let json = serde_json::to_string(&Sensor::Landsat8Toa).unwrap();
        assert_eq!(json, "\"LANDSAT/LC08/C01/T1_TOA\"");
        let back: Sensor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Sensor::Landsat8Toa);
    }
}
