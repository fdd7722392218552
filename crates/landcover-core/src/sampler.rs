//! Stratified point sampling from labelled polygons.
//!
//! Features are partitioned and filtered, painted onto a class-id surface on
//! the sampling grid (later features over earlier ones), and a fixed number
//! of pixel centres is drawn per class.

use std::collections::BTreeMap;

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::layers::{ClassId, LayerSet};
use crate::partition::{surviving_parts, PartitionFilter};
use crate::raster::GridSpec;

/// A sampled pixel centre with its class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelledPoint {
    pub lon: f64,
    pub lat: f64,
    pub class_id: ClassId,
}

/// Sampler inputs other than the layers themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleParams<'a> {
    pub points_per_class: usize,
    pub seed: u64,
    pub class_property: &'a str,
    pub filter: PartitionFilter,
    pub partition_seed: u64,
    /// Pixel lattice (size and alignment) the class surface is laid on.
    pub grid: GridSpec,
}

/// Class-id surface on the sampling grid; `None` = unpainted.
#[derive(Debug, Clone)]
pub struct ClassSurface {
    pub grid: GridSpec,
    pub classes: Vec<Option<ClassId>>,
}

impl ClassSurface {
    fn new(grid: GridSpec) -> Self {
        Self { grid, classes: vec![None; grid.len()] }
    }

    /// Paint every pixel whose centre lies inside `shape`.
    fn paint(&mut self, shape: &MultiPolygon<f64>, class_id: ClassId) -> usize {
        let Some(bounds) = shape.bounding_rect() else {
            return 0;
        };
        let g = self.grid;
        let (Some((r0, c0)), Some((r1, c1))) = (
            g.locate(bounds.min().x.max(g.min_lon), bounds.min().y.max(g.min_lat)),
            g.locate(bounds.max().x.min(g.max_lon), bounds.max().y.min(g.max_lat)),
        ) else {
            return 0;
        };

        let mut painted = 0;
        for r in r0..=r1 {
            for c in c0..=c1 {
                let (lon, lat) = g.pixel_center(r, c);
                if shape.contains(&Point::new(lon, lat)) {
                    self.classes[r * g.width + c] = Some(class_id);
                    painted += 1;
                }
            }
        }
        painted
    }

    /// Pixel indices per class, classes in ascending order.
    pub fn pixels_by_class(&self) -> BTreeMap<ClassId, Vec<usize>> {
        let mut by_class: BTreeMap<ClassId, Vec<usize>> = BTreeMap::new();
        for (i, c) in self.classes.iter().enumerate() {
            if let Some(c) = c {
                by_class.entry(*c).or_default().push(i);
            }
        }
        by_class
    }
}

/// Union bounding rect of `shapes`, as `(min_lon, min_lat, max_lon, max_lat)`.
fn union_bounds<'s>(shapes: impl IntoIterator<Item = &'s MultiPolygon<f64>>) -> Option<(f64, f64, f64, f64)> {
    shapes
        .into_iter()
        .filter_map(|s| s.bounding_rect())
        .map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
        .reduce(|a, b| (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3)))
}

/// Paint the filtered parts of every training layer.
///
/// The surface covers the union of the surviving parts on the pixel lattice
/// of `params.grid`, so features outside the AOI are still sampled.
///
/// Fails when the AOI is missing, no training layer exists, a layer has no
/// valid class id, or no part survives the filter at all.
pub fn paint_classes(layers: &LayerSet, params: &SampleParams<'_>) -> Result<ClassSurface> {
    layers.aoi()?;
    let mut n_layers = 0;
    let mut declared: BTreeMap<ClassId, usize> = BTreeMap::new();
    let mut survivors = Vec::new();

    for layer in layers.training_layers() {
        n_layers += 1;
        let class_id = layer.class_id(params.class_property)?;
        declared.entry(class_id).or_default();
        match surviving_parts(layer, params.class_property, params.partition_seed, params.filter)? {
            Some((class_id, shape)) => survivors.push((layer.name.as_str(), class_id, shape)),
            None => debug!("layer {:?}: no part passes {}", layer.name, params.filter),
        }
    }

    if n_layers == 0 {
        return Err(PipelineError::config(
            "no training features: digitise features with an integer class property",
        ));
    }
    let Some((min_lon, min_lat, max_lon, max_lat)) = union_bounds(survivors.iter().map(|(_, _, s)| s)) else {
        return Err(PipelineError::degenerate(format!(
            "no polygon part passes {}",
            params.filter
        )));
    };

    let grid = params.grid.snapped_to(min_lon, min_lat, max_lon, max_lat);
    debug!("sampling grid {}x{} over [{min_lon}, {max_lon}] x [{min_lat}, {max_lat}]", grid.width, grid.height);
    let mut surface = ClassSurface::new(grid);
    for (name, class_id, shape) in &survivors {
        let painted = surface.paint(shape, *class_id);
        debug!("layer {name:?} (class {class_id}): {painted} pixels painted");
    }

    let by_class = surface.pixels_by_class();
    for class_id in declared.keys() {
        match by_class.get(class_id) {
            Some(px) => info!("class {class_id}: {} pixels", px.len()),
            None => {
                return Err(PipelineError::degenerate(format!(
                    "class {class_id} covers no pixel centre under {}",
                    params.filter
                )))
            }
        }
    }
    Ok(surface)
}

/// Draw exactly `points_per_class` points for every class on the surface.
///
/// Classes with enough pixels are sampled without replacement; smaller
/// classes are sampled with replacement so every class still yields `n`.
pub fn sample_surface(surface: &ClassSurface, points_per_class: usize, seed: u64) -> Vec<LabelledPoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    let grid = surface.grid;
    let mut points = Vec::new();

    for (class_id, pixels) in surface.pixels_by_class() {
        let picks: Vec<usize> = if pixels.len() >= points_per_class {
            rand::seq::index::sample(&mut rng, pixels.len(), points_per_class).into_vec()
        } else {
            warn!(
                "class {class_id}: only {} pixels for {points_per_class} points, sampling with replacement",
                pixels.len()
            );
            (0..points_per_class).map(|_| rng.gen_range(0..pixels.len())).collect()
        };
        for k in picks {
            let idx = pixels[k];
            let (lon, lat) = grid.pixel_center(idx / grid.width, idx % grid.width);
            points.push(LabelledPoint { lon, lat, class_id });
        }
    }
    points
}

/// Paint and sample in one call.
pub fn stratified_sample(layers: &LayerSet, params: &SampleParams<'_>) -> Result<Vec<LabelledPoint>> {
    let surface = paint_classes(layers, params)?;
    let points = sample_surface(&surface, params.points_per_class, params.seed);
    info!("sampled {} points ({})", points.len(), params.filter);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::FeatureLayer;
    use crate::partition::HoldoutSplit;
    use geo::{polygon, Polygon};
    use std::collections::HashSet;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn grid() -> GridSpec {
        GridSpec::new(200, 200, 0.0, 200.0, 0.0, 200.0)
    }

    fn layers() -> LayerSet {
        LayerSet::new(vec![
            FeatureLayer::new("aoi", rect(0.0, 0.0, 200.0, 200.0)),
            // 10 000 pixels.
            FeatureLayer::new("forest", rect(0.0, 0.0, 100.0, 100.0)).with_class("land_class", 1),
            // 100 pixels.
            FeatureLayer::new("water", rect(150.0, 150.0, 160.0, 160.0)).with_class("land_class", 2),
        ])
    }

    fn params(n: usize, seed: u64, filter: PartitionFilter) -> SampleParams<'static> {
        SampleParams {
            points_per_class: n,
            seed,
            class_property: "land_class",
            filter,
            partition_seed: 0,
            grid: grid(),
        }
    }

    #[test]
    fn every_class_gets_exactly_n_points() {
        let pts = stratified_sample(&layers(), &params(50, 7638, PartitionFilter::ALL)).unwrap();
        let ones = pts.iter().filter(|p| p.class_id == 1).count();
        let twos = pts.iter().filter(|p| p.class_id == 2).count();
        assert_eq!((ones, twos), (50, 50));
        for p in pts.iter().filter(|p| p.class_id == 2) {
            assert!(p.lon > 150.0 && p.lon < 160.0 && p.lat > 150.0 && p.lat < 160.0);
        }
    }

    #[test]
    fn without_replacement_points_are_distinct() {
        let pts = stratified_sample(&layers(), &params(100, 1, PartitionFilter::ALL)).unwrap();
        let water: HashSet<(u64, u64)> = pts
            .iter()
            .filter(|p| p.class_id == 2)
            .map(|p| (p.lon.to_bits(), p.lat.to_bits()))
            .collect();
        assert_eq!(water.len(), 100);
    }

    #[test]
    fn small_class_is_sampled_with_replacement() {
        let pts = stratified_sample(&layers(), &params(150, 3, PartitionFilter::ALL)).unwrap();
        assert_eq!(pts.iter().filter(|p| p.class_id == 2).count(), 150);
    }

    #[test]
    fn same_seed_same_points() {
        let a = stratified_sample(&layers(), &params(30, 42, PartitionFilter::ALL)).unwrap();
        let b = stratified_sample(&layers(), &params(30, 42, PartitionFilter::ALL)).unwrap();
        let c = stratified_sample(&layers(), &params(30, 43, PartitionFilter::ALL)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn later_layers_paint_over_earlier() {
        let mut set = layers();
        set.layers.push(FeatureLayer::new("urban", rect(0.0, 0.0, 50.0, 100.0)).with_class("land_class", 3));
        let surface = paint_classes(&set, &params(1, 0, PartitionFilter::ALL)).unwrap();
        let by_class = surface.pixels_by_class();
        assert_eq!(by_class[&1].len(), 5_000);
        assert_eq!(by_class[&3].len(), 5_000);
    }

    #[test]
    fn matched_seed_splits_are_disjoint() {
        // One feature with many parts so both sides of the split are populated.
        let parts: Vec<Polygon<f64>> = (0..40)
            .map(|i| rect(i as f64 * 5.0, 0.0, i as f64 * 5.0 + 4.0, 4.0))
            .collect();
        let set = LayerSet::new(vec![
            FeatureLayer::new("aoi", rect(0.0, 0.0, 200.0, 200.0)),
            FeatureLayer::new("crop", MultiPolygon::new(parts)).with_class("land_class", 1),
        ]);
        let split = HoldoutSplit::new(0, 30.0);
        let train = stratified_sample(&set, &params(40, 7638, split.training())).unwrap();
        let valid = stratified_sample(&set, &params(20, 2982, split.validation())).unwrap();
        let train_px: HashSet<(u64, u64)> = train.iter().map(|p| (p.lon.to_bits(), p.lat.to_bits())).collect();
        assert!(valid.iter().all(|p| !train_px.contains(&(p.lon.to_bits(), p.lat.to_bits()))));
    }

    #[test]
    fn missing_aoi_is_rejected() {
        let mut set = layers();
        set.layers.remove(0);
        let err = stratified_sample(&set, &params(10, 0, PartitionFilter::ALL)).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn class_without_a_pixel_centre_is_degenerate() {
        let mut set = layers();
        set.layers.push(FeatureLayer::new("sliver", rect(170.1, 170.1, 170.4, 170.4)).with_class("land_class", 4));
        let err = stratified_sample(&set, &params(10, 0, PartitionFilter::ALL)).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateInput(_)));
    }

    #[test]
    fn class_outside_the_aoi_is_still_sampled() {
        let set = LayerSet::new(vec![
            FeatureLayer::new("aoi", rect(0.0, 0.0, 10.0, 10.0)),
            FeatureLayer::new("forest", rect(1.0, 1.0, 9.0, 9.0)).with_class("land_class", 1),
            FeatureLayer::new("water", rect(12.0, 2.0, 15.0, 5.0)).with_class("land_class", 2),
        ]);
        let lattice = GridSpec::new(10, 10, 0.0, 10.0, 0.0, 10.0);
        let p = SampleParams { grid: lattice, ..params(5, 11, PartitionFilter::ALL) };
        let pts = stratified_sample(&set, &p).unwrap();
        let water: Vec<_> = pts.iter().filter(|p| p.class_id == 2).collect();
        assert_eq!(water.len(), 5);
        assert_eq!(pts.iter().filter(|p| p.class_id == 1).count(), 5);
        for p in water {
            assert!(p.lon > 12.0 && p.lon < 15.0 && p.lat > 2.0 && p.lat < 5.0);
            // Still on the lattice: pixel centres sit on half-degrees.
            assert_eq!(p.lon.fract(), 0.5);
        }
    }

    #[test]
    fn only_aoi_is_configuration_error() {
        let set = LayerSet::new(vec![FeatureLayer::new("aoi", rect(0.0, 0.0, 1.0, 1.0))]);
        let err = stratified_sample(&set, &params(10, 0, PartitionFilter::ALL)).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
