//! Per-sensor cloud/quality masking from the QA band.

use crate::error::{PipelineError, Result};
use crate::imagery::Image;
use crate::raster::Band;
use crate::sensor::SensorProfile;

/// Pixel validity from a QA band: valid iff none of `bitmask`'s bits are set.
/// A no-data QA value is invalid.
pub fn validity_mask(qa: &[f32], bitmask: u32) -> Vec<bool> {
    qa.iter()
        .map(|&v| !v.is_nan() && (v as u32) & bitmask == 0)
        .collect()
}

/// Mask `image` with its sensor's QA band and keep only `bands`.
///
/// Invalid pixels become NaN. Sensors with a reflectance divisor (Sentinel-2)
/// are scaled after masking.
pub fn mask_image(image: &Image, profile: &SensorProfile, bands: &[&str]) -> Result<Vec<Band>> {
    let qa = image.band(profile.qa_band).ok_or_else(|| {
        PipelineError::Backend(format!("image {} has no {} band", image.id, profile.qa_band))
    })?;
    let valid = validity_mask(&qa.data, profile.qa_bitmask());
    let divisor = profile.reflectance_divisor.unwrap_or(1.0);

    bands
        .iter()
        .map(|&name| {
            let src = image.band(name).ok_or_else(|| {
                PipelineError::Backend(format!("image {} has no {name} band", image.id))
            })?;
            if src.data.len() != qa.data.len() {
                return Err(PipelineError::Backend(format!(
                    "image {} band {name} has {} pixels, {} has {}",
                    image.id,
                    src.data.len(),
                    profile.qa_band,
                    qa.data.len()
                )));
            }
            let data = src
                .data
                .iter()
                .zip(&valid)
                .map(|(&v, &ok)| if ok { v / divisor } else { f32::NAN })
                .collect();
            Ok(Band::new(name, data))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Sensor;
    use std::collections::BTreeMap;

    fn image_with_qa(qa: Vec<f32>, value: f32, profile: &SensorProfile) -> Image {
        let n = qa.len();
        let mut bands: Vec<Band> = profile.bands.iter().map(|b| Band::filled(*b, n, value)).collect();
        bands.push(Band::new(profile.qa_band, qa));
        Image {
            id: "img".into(),
            date: "2021-06-01".parse().unwrap(),
            metadata: BTreeMap::new(),
            footprint: None,
            bands,
        }
    }

    #[test]
    fn sentinel2_masks_cloud_and_cirrus_and_rescales() {
        let p = Sensor::Sentinel2Sr.profile();
        let qa = vec![0.0, 1024.0, 2048.0, 3072.0, 1.0];
        let img = image_with_qa(qa, 5000.0, &p);
        let out = mask_image(&img, &p, &["B4"]).unwrap();
        let d = &out[0].data;
        assert!((d[0] - 0.5).abs() < 1e-6);
        assert!(d[1].is_nan() && d[2].is_nan() && d[3].is_nan());
        // Bit 0 is not a cloud bit.
        assert!((d[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn landsat_sr_masks_shadow_and_cloud_without_rescale() {
        let p = Sensor::Landsat8Sr.profile();
        let qa = vec![0.0, 8.0, 32.0, 16.0];
        let img = image_with_qa(qa, 1200.0, &p);
        let out = mask_image(&img, &p, &["B2", "B5"]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "B5");
        let d = &out[0].data;
        assert_eq!(d[0], 1200.0);
        assert!(d[1].is_nan() && d[2].is_nan());
        assert_eq!(d[3], 1200.0);
    }

    #[test]
    fn landsat_toa_masks_bit_four_only() {
        let mask = validity_mask(&[0.0, 16.0, 8.0, f32::NAN], Sensor::Landsat8Toa.profile().qa_bitmask());
        assert_eq!(mask, vec![true, false, true, false]);
    }

    #[test]
    fn missing_qa_band_is_backend_error() {
        let p = Sensor::Landsat8Sr.profile();
        let mut img = image_with_qa(vec![0.0], 1.0, &p);
        img.bands.retain(|b| b.name != p.qa_band);
        assert!(matches!(mask_image(&img, &p, &["B2"]), Err(PipelineError::Backend(_))));
    }

    #[test]
    fn band_shorter_than_qa_is_backend_error() {
        let p = Sensor::Landsat8Sr.profile();
        let mut img = image_with_qa(vec![0.0; 4], 1.0, &p);
        img.bands[0].data.truncate(3);
        assert!(matches!(mask_image(&img, &p, &["B2"]), Err(PipelineError::Backend(_))));
    }
}
