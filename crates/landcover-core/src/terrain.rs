//! Terrain predictor bands: height, slope and aspect.
//!
//! Derived once per elevation raster with Horn's (1981) 3×3 weighted
//! finite-difference gradient. Edge cells reuse their nearest interior
//! neighbour (index clamping), so every pixel gets a value.

use crate::error::{PipelineError, Result};
use crate::raster::{Band, GridSpec, Raster};

pub const HEIGHT_BAND: &str = "elevation";
pub const SLOPE_BAND: &str = "slope";
pub const ASPECT_BAND: &str = "aspect";

/// Below this gradient magnitude a cell is flat and gets aspect 0.
/// tan(0.01°) ≈ 1.745 × 10⁻⁴.
const FLAT_GRADIENT_THRESHOLD: f64 = 1.745e-4;

/// Horn gradient at `(r, c)` with clamped neighbours.
///
/// Returns `(dz_dx, dz_dy)`: rise per metre eastward and northward.
///
/// 3×3 neighbourhood layout (row 0 is south, so north is `r + 1`):
/// ```text
///   NW(+1,-1)  N(+1, 0)  NE(+1,+1)
///   W ( 0,-1)  *         E ( 0,+1)
///   SW(-1,-1)  S(-1, 0)  SE(-1,+1)
/// ```
fn horn_gradient(z: &[f32], grid: &GridSpec, r: usize, c: usize, cx: f64, cy: f64) -> (f64, f64) {
    let at = |dr: isize, dc: isize| -> f64 {
        let rr = (r as isize + dr).clamp(0, grid.height as isize - 1) as usize;
        let cc = (c as isize + dc).clamp(0, grid.width as isize - 1) as usize;
        z[rr * grid.width + cc] as f64
    };
    let (nw, n, ne) = (at(1, -1), at(1, 0), at(1, 1));
    let (w, e) = (at(0, -1), at(0, 1));
    let (sw, s, se) = (at(-1, -1), at(-1, 0), at(-1, 1));

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * cx);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * cy);
    (dz_dx, dz_dy)
}

/// Slope in degrees and downslope aspect in degrees clockwise from north.
fn slope_aspect(dz_dx: f64, dz_dy: f64) -> (f64, f64) {
    let magnitude = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();
    let slope = magnitude.atan().to_degrees();
    if magnitude < FLAT_GRADIENT_THRESHOLD {
        return (slope, 0.0);
    }
    // Downslope vector is (-dz_dx east, -dz_dy north).
    let aspect = (-dz_dx).atan2(-dz_dy).to_degrees().rem_euclid(360.0);
    (slope, aspect)
}

/// Derive `elevation`, `slope`, `aspect` from the first band of `dem`.
///
/// All three are truncated to 16-bit integers, matching the fixed-point
/// representation of the spectral bands they are stacked with. Elevation is
/// truncated before differencing, so slope and aspect describe the stacked
/// `elevation` band. No-data elevation becomes 0.
pub fn terrain_bands(dem: &Raster) -> Result<Raster> {
    let height = dem
        .bands
        .first()
        .ok_or_else(|| PipelineError::config("elevation raster has no bands"))?;
    let grid = dem.grid;
    if grid.is_empty() {
        return Err(PipelineError::config("elevation raster is empty"));
    }

    let z: Vec<f32> = height.data.iter().map(|&v| to_int16(v)).collect();
    let (cx, cy) = grid.cellsize_m();

    let mut slope = Vec::with_capacity(grid.len());
    let mut aspect = Vec::with_capacity(grid.len());
    for r in 0..grid.height {
        for c in 0..grid.width {
            let (dz_dx, dz_dy) = horn_gradient(&z, &grid, r, c, cx, cy);
            let (s, a) = slope_aspect(dz_dx, dz_dy);
            slope.push(to_int16(s as f32));
            aspect.push(to_int16(a as f32));
        }
    }

    let mut out = Raster::new(grid);
    out.push_band(Band::new(HEIGHT_BAND, z));
    out.push_band(Band::new(SLOPE_BAND, slope));
    out.push_band(Band::new(ASPECT_BAND, aspect));
    Ok(out)
}

/// Truncate toward zero and saturate to the i16 range, kept as f32.
#[inline]
pub(crate) fn to_int16(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { (v as i16) as f32 }
}
