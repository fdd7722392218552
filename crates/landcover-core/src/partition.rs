//! Deterministic split of digitised features into training and validation
//! parts.
//!
//! Every feature is exploded into single polygons. Each part gets a uniform
//! value in [0, 1) from an RNG seeded per feature with the partition seed, so
//! part `i` of any feature always draws the `i`-th value of the same
//! sequence. Applying `random <= 1 - p` and `random > 1 - p` with the same
//! seed yields two disjoint sets of parts.

use std::fmt;
use std::str::FromStr;

use geo::{Geometry, MultiPolygon, Polygon};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::layers::{ClassId, FeatureLayer};

/// One single-polygon part of a user feature.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedPolygon {
    pub polygon: Polygon<f64>,
    pub class_id: ClassId,
    pub random: f64,
}

/// Explode `geometry` into its polygons, in document order. Points and lines
/// contribute nothing.
pub fn explode_polygons(geometry: &Geometry<f64>) -> Vec<Polygon<f64>> {
    let mut out = Vec::new();
    collect_polygons(geometry, &mut out);
    out
}

fn collect_polygons(geometry: &Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p.clone()),
        Geometry::MultiPolygon(mp) => out.extend(mp.0.iter().cloned()),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc.iter() {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

/// Partition one feature under `class_property` with `seed`.
pub fn partition_feature(
    layer: &FeatureLayer,
    class_property: &str,
    seed: u64,
) -> Result<Vec<PartitionedPolygon>> {
    let class_id = layer.class_id(class_property)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(explode_polygons(&layer.geometry)
        .into_iter()
        .map(|polygon| PartitionedPolygon { polygon, class_id, random: rng.gen::<f64>() })
        .collect())
}

// ── Filters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "<=")]
    AtMost,
    #[serde(rename = ">")]
    Above,
}

/// Inclusion test on a part's `random` value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionFilter {
    pub op: FilterOp,
    pub threshold: f64,
}

impl PartitionFilter {
    /// Keep-everything filter.
    pub const ALL: PartitionFilter = PartitionFilter { op: FilterOp::AtMost, threshold: 1.0 };

    /// `random <= 1 - p`, `p` the validation fraction in [0, 1].
    pub fn training(validation_fraction: f64) -> Self {
        Self { op: FilterOp::AtMost, threshold: 1.0 - validation_fraction }
    }

    /// `random > 1 - p`.
    pub fn validation(validation_fraction: f64) -> Self {
        Self { op: FilterOp::Above, threshold: 1.0 - validation_fraction }
    }

    pub fn matches(&self, random: f64) -> bool {
        match self.op {
            FilterOp::AtMost => random <= self.threshold,
            FilterOp::Above => random > self.threshold,
        }
    }
}

impl fmt::Display for PartitionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            FilterOp::AtMost => "<=",
            FilterOp::Above => ">",
        };
        write!(f, "random {op} {}", self.threshold)
    }
}

/// Parses `"<= 0.7"` or `"> 0.7"`.
impl FromStr for PartitionFilter {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix("<=") {
            (FilterOp::AtMost, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (FilterOp::Above, rest)
        } else {
            return Err(PipelineError::config(format!("filter {s:?} must start with <= or >")));
        };
        let threshold: f64 = rest
            .trim()
            .parse()
            .map_err(|_| PipelineError::config(format!("filter {s:?} has no numeric threshold")))?;
        Ok(Self { op, threshold })
    }
}

/// Training/validation split sharing one partition seed, so the two filters
/// always see the same `random` values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldoutSplit {
    pub partition_seed: u64,
    /// Fraction in [0, 1] held out for validation.
    pub validation_fraction: f64,
}

impl HoldoutSplit {
    pub fn new(partition_seed: u64, validation_percent: f64) -> Self {
        Self { partition_seed, validation_fraction: validation_percent / 100.0 }
    }

    pub fn training(&self) -> PartitionFilter {
        PartitionFilter::training(self.validation_fraction)
    }

    pub fn validation(&self) -> PartitionFilter {
        PartitionFilter::validation(self.validation_fraction)
    }
}

/// Partition `layer`, keep parts accepted by `filter` and collapse them back
/// into one multipolygon. `None` when no part survives.
pub fn surviving_parts(
    layer: &FeatureLayer,
    class_property: &str,
    seed: u64,
    filter: PartitionFilter,
) -> Result<Option<(ClassId, MultiPolygon<f64>)>> {
    let parts = partition_feature(layer, class_property, seed)?;
    let class_id = match parts.first() {
        Some(p) => p.class_id,
        None => return Ok(None),
    };
    let kept: Vec<Polygon<f64>> = parts
        .into_iter()
        .filter(|p| filter.matches(p.random))
        .map(|p| p.polygon)
        .collect();
    if kept.is_empty() {
        Ok(None)
    } else {
        Ok(Some((class_id, MultiPolygon::new(kept))))
    }
}
