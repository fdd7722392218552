//! Per-point feature extraction from a composite stack.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::composite::CompositeStack;
use crate::error::{PipelineError, Result};
use crate::layers::ClassId;
use crate::sampler::LabelledPoint;

const NO_COMPOSITE: &str =
    "Make sure you have selected a valid set of images. Choose an image collection and set the start date";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub values: Vec<f32>,
    pub class_id: ClassId,
}

/// Band values at labelled points. `band_order` names the columns of every
/// row's `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub band_order: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.band_order.len()
    }
}

/// Sample every band of `stack` at each point's pixel.
///
/// `stack` is optional because a run may try to extract before a composite
/// exists; that is a configuration error, not a panic. Points off the
/// composite grid are a `DegenerateInput` error.
pub fn extract_features(stack: Option<&CompositeStack>, points: &[LabelledPoint]) -> Result<FeatureTable> {
    let stack = stack.ok_or_else(|| PipelineError::config(NO_COMPOSITE))?;
    let grid = stack.grid();

    let mut rows = Vec::with_capacity(points.len());
    let mut off_grid = 0usize;
    for p in points {
        match grid.locate(p.lon, p.lat) {
            Some((r, c)) => rows.push(FeatureRow { values: stack.raster.pixel(r, c), class_id: p.class_id }),
            None => off_grid += 1,
        }
    }
    if off_grid > 0 {
        return Err(PipelineError::degenerate(format!(
            "{off_grid} of {} points fall outside the composite grid",
            points.len()
        )));
    }
    debug!("extracted {} rows of {} bands", rows.len(), stack.raster.bands.len());
    Ok(FeatureTable { band_order: stack.band_names(), rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Band, GridSpec, Raster};
    use crate::sensor::Sensor;

    fn stack() -> CompositeStack {
        let grid = GridSpec::new(2, 2, 0.0, 2.0, 0.0, 2.0);
        let raster = Raster::new(grid)
            .with_band(Band::new("B4", vec![1.0, 2.0, 3.0, 4.0]))
            .with_band(Band::new("elevation", vec![10.0, 20.0, 30.0, 40.0]));
        CompositeStack { sensor: Sensor::Landsat8Sr, raster }
    }

    #[test]
    fn rows_follow_band_order() {
        let pts = [
            LabelledPoint { lon: 0.5, lat: 0.5, class_id: 1 },
            LabelledPoint { lon: 1.5, lat: 1.5, class_id: 2 },
        ];
        let table = extract_features(Some(&stack()), &pts).unwrap();
        assert_eq!(table.band_order, vec!["B4", "elevation"]);
        assert_eq!(table.rows[0].values, vec![1.0, 10.0]);
        assert_eq!(table.rows[1], FeatureRow { values: vec![4.0, 40.0], class_id: 2 });
    }

    #[test]
    fn points_off_the_grid_are_rejected() {
        let pts = [
            LabelledPoint { lon: 0.5, lat: 0.5, class_id: 1 },
            LabelledPoint { lon: 9.0, lat: 9.0, class_id: 1 },
        ];
        let err = extract_features(Some(&stack()), &pts).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateInput(_)));
        assert!(err.to_string().contains("1 of 2 points"));
    }

    #[test]
    fn missing_stack_asks_for_images() {
        let err = extract_features(None, &[]).unwrap_err();
        assert!(err.to_string().contains("valid set of images"));
    }
}
