use serde::{Deserialize, Serialize};

/// Metres per degree of latitude (and of longitude at the equator).
const M_PER_DEG: f64 = 111_320.0;

/// Geographic grid shared by every raster in one run.
/// Row-major, row 0 = `min_lat` (south to north), column 0 = `min_lon`.
/// Coordinate math uses f64; pixel values use f32.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GridSpec {
    pub fn new(width: usize, height: usize, min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self { width, height, min_lon, max_lon, min_lat, max_lat }
    }

    /// Grid of roughly `resolution_m` square pixels anchored at the
    /// south-west corner of the bounds and covering all of them.
    pub fn covering(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64, resolution_m: f64) -> Self {
        let mid_lat = (min_lat + max_lat) / 2.0;
        let dy = resolution_m / M_PER_DEG;
        let dx = dy / mid_lat.to_radians().cos().max(1e-6);
        let width = ((max_lon - min_lon) / dx).ceil().max(1.0) as usize;
        let height = ((max_lat - min_lat) / dy).ceil().max(1.0) as usize;
        Self::new(
            width,
            height,
            min_lon,
            min_lon + width as f64 * dx,
            min_lat,
            min_lat + height as f64 * dy,
        )
    }

    /// Grid on this grid's pixel lattice (same pixel size and alignment)
    /// that covers the given bounds. The bounds may lie partly or wholly
    /// outside this grid.
    pub fn snapped_to(&self, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        let (dx, dy) = self.pixel_size();
        let c0 = ((min_lon - self.min_lon) / dx).floor();
        let r0 = ((min_lat - self.min_lat) / dy).floor();
        let width = (((max_lon - self.min_lon) / dx).ceil() - c0).max(1.0) as usize;
        let height = (((max_lat - self.min_lat) / dy).ceil() - r0).max(1.0) as usize;
        let lon0 = self.min_lon + c0 * dx;
        let lat0 = self.min_lat + r0 * dy;
        Self::new(width, height, lon0, lon0 + width as f64 * dx, lat0, lat0 + height as f64 * dy)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel size in degrees, `(dx, dy)`.
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            (self.max_lon - self.min_lon) / self.width as f64,
            (self.max_lat - self.min_lat) / self.height as f64,
        )
    }

    /// Longitude/latitude of the centre of pixel `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let (dx, dy) = self.pixel_size();
        (
            self.min_lon + (col as f64 + 0.5) * dx,
            self.min_lat + (row as f64 + 0.5) * dy,
        )
    }

    /// Pixel containing `(lon, lat)`; `None` outside the grid.
    /// The north and east edges belong to the last row/column.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if self.is_empty()
            || !(self.min_lon..=self.max_lon).contains(&lon)
            || !(self.min_lat..=self.max_lat).contains(&lat)
        {
            return None;
        }
        let (dx, dy) = self.pixel_size();
        let col = (((lon - self.min_lon) / dx).floor() as usize).min(self.width - 1);
        let row = (((lat - self.min_lat) / dy).floor() as usize).min(self.height - 1);
        Some((row, col))
    }

    /// Per-axis cell size in metres, `(cx, cy)`, from the geographic
    /// bounds. Falls back to 30 m on an axis with zero extent.
    pub fn cellsize_m(&self) -> (f64, f64) {
        let (dx, dy) = self.pixel_size();
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let cx = dx.abs() * M_PER_DEG * mid_lat.to_radians().cos();
        let cy = dy.abs() * M_PER_DEG;
        let fallback = |v: f64| if v.is_finite() && v > 1e-3 { v } else { 30.0 };
        (fallback(cx), fallback(cy))
    }
}

/// JSON has no NaN: serde_json writes it as `null`, so read `null` back as NaN.
fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

/// One named band. `NaN` marks no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
}

impl Band {
    pub fn new(name: impl Into<String>, data: Vec<f32>) -> Self {
        Self { name: name.into(), data }
    }

    pub fn filled(name: impl Into<String>, len: usize, fill: f32) -> Self {
        Self::new(name, vec![fill; len])
    }
}

/// A multi-band raster on one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    pub grid: GridSpec,
    pub bands: Vec<Band>,
}

impl Raster {
    pub fn new(grid: GridSpec) -> Self {
        Self { grid, bands: Vec::new() }
    }

    pub fn with_band(mut self, band: Band) -> Self {
        self.push_band(band);
        self
    }

    /// Appends a band. Panics if the band length does not match the grid;
    /// that is a programming error, not an input condition.
    pub fn push_band(&mut self, band: Band) {
        assert_eq!(
            band.data.len(),
            self.grid.len(),
            "band {} has {} pixels, grid has {}",
            band.name,
            band.data.len(),
            self.grid.len()
        );
        self.bands.push(band);
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.bands[band].data[row * self.grid.width + col]
    }

    /// Values of every band at pixel `(row, col)`, in band order.
    pub fn pixel(&self, row: usize, col: usize) -> Vec<f32> {
        let idx = row * self.grid.width + col;
        self.bands.iter().map(|b| b.data[idx]).collect()
    }

    /// Nearest-pixel value of `band` at `(lon, lat)`; `None` outside the grid.
    pub fn sample_nearest(&self, band: usize, lon: f64, lat: f64) -> Option<f32> {
        self.grid.locate(lon, lat).map(|(r, c)| self.get(band, r, c))
    }

    /// Resample every band onto `target` by nearest pixel centre.
    /// Target pixels outside this raster get `fill`.
    pub fn resample_nearest(&self, target: GridSpec, fill: f32) -> Raster {
        let mut out = Raster::new(target);
        for (bi, band) in self.bands.iter().enumerate() {
            let mut data = Vec::with_capacity(target.len());
            for r in 0..target.height {
                for c in 0..target.width {
                    let (lon, lat) = target.pixel_center(r, c);
                    data.push(self.sample_nearest(bi, lon, lat).unwrap_or(fill));
                }
            }
            out.push_band(Band::new(band.name.clone(), data));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid(n: usize) -> GridSpec {
        GridSpec::new(n, n, 0.0, n as f64, 0.0, n as f64)
    }

    #[test]
    fn pixel_center_and_locate_agree() {
        let g = unit_grid(4);
        for r in 0..4 {
            for c in 0..4 {
                let (lon, lat) = g.pixel_center(r, c);
                assert_eq!(g.locate(lon, lat), Some((r, c)));
            }
        }
    }

    #[test]
    fn row_zero_is_south() {
        let g = unit_grid(4);
        assert_eq!(g.pixel_center(0, 0), (0.5, 0.5));
        assert_eq!(g.locate(0.1, 3.9), Some((3, 0)));
    }

    #[test]
    fn locate_outside_returns_none() {
        let g = unit_grid(4);
        assert!(g.locate(-0.1, 1.0).is_none());
        assert!(g.locate(1.0, 4.1).is_none());
        assert_eq!(g.locate(4.0, 4.0), Some((3, 3)));
    }

    #[test]
    fn resample_nearest_upsamples_by_pixel_centre() {
        let src = Raster::new(unit_grid(2)).with_band(Band::new("v", vec![1.0, 2.0, 3.0, 4.0]));
        let out = src.resample_nearest(unit_grid(2), -1.0);
        assert_eq!(out.bands[0].data, vec![1.0, 2.0, 3.0, 4.0]);

        let fine = GridSpec::new(4, 4, 0.0, 2.0, 0.0, 2.0);
        let out = src.resample_nearest(fine, -1.0);
        assert_eq!(out.get(0, 0, 0), 1.0);
        assert_eq!(out.get(0, 3, 3), 4.0);
    }

    #[test]
    fn nan_survives_json() {
        let band = Band::new("b", vec![1.0, f32::NAN]);
        let json = serde_json::to_string(&band).unwrap();
        let back: Band = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data[0], 1.0);
        assert!(back.data[1].is_nan());
    }

    #[test]
    fn covering_grid_contains_bounds() {
        // 0.01° ≈ 1113 m at the equator.
        let g = GridSpec::covering(0.0, 0.0, 0.01, 0.01, 100.0);
        assert_eq!((g.width, g.height), (12, 12));
        assert!(g.max_lon >= 0.01 && g.max_lat >= 0.01);
        let (cx, cy) = g.cellsize_m();
        assert!((cx - 100.0).abs() < 0.1 && (cy - 100.0).abs() < 0.1);
    }

    #[test]
    fn snapped_grid_keeps_the_lattice() {
        let g = unit_grid(10);
        let s = g.snapped_to(12.3, 2.0, 14.5, 4.9);
        assert_eq!((s.width, s.height), (3, 3));
        assert_eq!((s.min_lon, s.max_lon), (12.0, 15.0));
        assert_eq!((s.min_lat, s.max_lat), (2.0, 5.0));
        assert_eq!(s.pixel_center(0, 0), (12.5, 2.5));

        let west = g.snapped_to(-3.5, 0.0, 1.0, 1.0);
        assert_eq!((west.min_lon, west.width), (-4.0, 5));
    }

    #[test]
    #[should_panic]
    fn push_band_rejects_wrong_length() {
        let mut r = Raster::new(unit_grid(2));
        r.push_band(Band::new("bad", vec![0.0; 3]));
    }
}
