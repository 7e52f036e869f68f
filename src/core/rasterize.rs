use crate::types::{GeoTransform, LvisError, LvisResult, Raster, NO_DATA, NO_DATA_ELEVATION};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Output grid parameters for footprint binning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterParams {
    /// Pixel size in output CRS units (metres)
    pub resolution: f64,
    /// EPSG code of the coordinates handed to the rasterizer
    pub epsg: u32,
}

impl Default for RasterParams {
    fn default() -> Self {
        Self {
            resolution: 30.0,
            epsg: 3031,
        }
    }
}

/// Pixel windows derived from the data extent.
///
/// Column `j` covers `[min_x + j*res, min_x + (j+1)*res)` and row `i` covers
/// `[max_y - (i+1)*res, max_y - i*res)`. Neighbouring windows share the
/// exact same boundary expression, so they partition the plane.
#[derive(Debug, Clone, Copy)]
pub struct PointGrid {
    pub min_x: f64,
    pub max_y: f64,
    pub resolution: f64,
    pub n_x: usize,
    pub n_y: usize,
}

impl PointGrid {
    pub fn from_points(x: &[f64], y: &[f64], resolution: f64) -> LvisResult<Self> {
        let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
        for (&px, &py) in x.iter().zip(y.iter()) {
            min_x = min_x.min(px);
            max_x = max_x.max(px);
            min_y = min_y.min(py);
            max_y = max_y.max(py);
        }
        if !(min_x.is_finite() && max_x.is_finite() && min_y.is_finite() && max_y.is_finite()) {
            return Err(LvisError::InvalidInput(
                "Footprint coordinates must be finite".to_string(),
            ));
        }

        Ok(Self {
            min_x,
            max_y,
            resolution,
            n_x: ((max_x - min_x) / resolution).floor() as usize + 1,
            n_y: ((max_y - min_y) / resolution).floor() as usize + 1,
        })
    }

    pub fn col_window(&self, j: usize) -> (f64, f64) {
        (
            self.min_x + j as f64 * self.resolution,
            self.min_x + (j + 1) as f64 * self.resolution,
        )
    }

    /// Half-open `[lo, hi)` window of row `i`, counted down from `max_y`.
    ///
    /// Row 0 ends at `max_y` exclusive, so a point lying exactly on the
    /// northern extent edge belongs to no row and is dropped. A lone
    /// footprint therefore yields a single no-data pixel. This is the
    /// intended binning rule, not an off-by-one.
    pub fn row_window(&self, i: usize) -> (f64, f64) {
        (
            self.max_y - (i + 1) as f64 * self.resolution,
            self.max_y - i as f64 * self.resolution,
        )
    }

    /// Column whose window holds `x`, checked against the exact window bounds
    pub fn locate_col(&self, x: f64) -> Option<usize> {
        let guess = ((x - self.min_x) / self.resolution).floor();
        Self::search(guess, self.n_x, |j| {
            let (lo, hi) = self.col_window(j);
            x >= lo && x < hi
        })
    }

    pub fn locate_row(&self, y: f64) -> Option<usize> {
        let guess = ((self.max_y - y) / self.resolution).floor();
        Self::search(guess, self.n_y, |i| {
            let (lo, hi) = self.row_window(i);
            y >= lo && y < hi
        })
    }

    fn search(guess: f64, n: usize, inside: impl Fn(usize) -> bool) -> Option<usize> {
        if !guess.is_finite() {
            return None;
        }
        let guess = guess as i64;
        (guess - 1..=guess + 1)
            .filter(|&k| k >= 0 && (k as usize) < n)
            .map(|k| k as usize)
            .find(|&k| inside(k))
    }

    pub fn transform(&self) -> GeoTransform {
        GeoTransform::north_up(self.min_x, self.max_y, self.resolution)
    }
}

/// Bins irregular footprints into a regular grid by per-pixel averaging
pub struct Rasterizer {
    params: RasterParams,
}

impl Rasterizer {
    /// Create a new rasterizer with default parameters
    pub fn new() -> Self {
        Self {
            params: RasterParams::default(),
        }
    }

    /// Create a new rasterizer with custom parameters
    pub fn with_params(params: RasterParams) -> Self {
        Self { params }
    }

    /// Grid the footprints, one pass over the footprints plus one over pixels.
    ///
    /// No-data ground values extend the grid extent but never enter a mean.
    pub fn rasterize(&self, x: &[f64], y: &[f64], values: &[f64]) -> LvisResult<Raster> {
        let grid = self.prepare(x, y, values)?;
        log::debug!(
            "Rasterizing {} footprints onto {}x{} grid at {} m",
            values.len(),
            grid.n_x,
            grid.n_y,
            grid.resolution
        );

        let mut sum = Array2::<f64>::zeros((grid.n_y, grid.n_x));
        let mut count = Array2::<u32>::zeros((grid.n_y, grid.n_x));
        let mut dropped = 0usize;

        for ((&px, &py), &v) in x.iter().zip(y.iter()).zip(values.iter()) {
            if !is_valid_elevation(v) {
                continue;
            }
            match (grid.locate_row(py), grid.locate_col(px)) {
                (Some(i), Some(j)) => {
                    sum[[i, j]] += v;
                    count[[i, j]] += 1;
                }
                _ => dropped += 1,
            }
        }
        if dropped > 0 {
            log::debug!("{} footprints fell outside every pixel window", dropped);
        }

        let data = Array2::from_shape_fn((grid.n_y, grid.n_x), |(i, j)| {
            let n = count[[i, j]];
            if n > 0 {
                (sum[[i, j]] / n as f64) as f32
            } else {
                NO_DATA
            }
        });

        let raster = Raster::new(data, grid.transform(), self.params.epsg);
        log::info!(
            "Rasterized {} footprints into {} valid pixels",
            values.len(),
            raster.valid_count()
        );
        Ok(raster)
    }

    /// Reference binning that tests every footprint against every pixel window
    pub fn rasterize_direct(&self, x: &[f64], y: &[f64], values: &[f64]) -> LvisResult<Raster> {
        let grid = self.prepare(x, y, values)?;
        let mut data = Array2::from_elem((grid.n_y, grid.n_x), NO_DATA);

        for i in 0..grid.n_y {
            let (y_lo, y_hi) = grid.row_window(i);
            for j in 0..grid.n_x {
                let (x_lo, x_hi) = grid.col_window(j);
                let mut sum = 0.0;
                let mut n = 0u32;
                for ((&px, &py), &v) in x.iter().zip(y.iter()).zip(values.iter()) {
                    if is_valid_elevation(v) && px >= x_lo && px < x_hi && py >= y_lo && py < y_hi {
                        sum += v;
                        n += 1;
                    }
                }
                if n > 0 {
                    data[[i, j]] = (sum / n as f64) as f32;
                }
            }
        }

        Ok(Raster::new(data, grid.transform(), self.params.epsg))
    }

    fn prepare(&self, x: &[f64], y: &[f64], values: &[f64]) -> LvisResult<PointGrid> {
        if x.len() != y.len() || x.len() != values.len() {
            return Err(LvisError::InvalidInput(format!(
                "Coordinate and value arrays differ in length: {} / {} / {}",
                x.len(),
                y.len(),
                values.len()
            )));
        }
        if x.is_empty() {
            return Err(LvisError::InvalidInput(
                "Cannot rasterize an empty footprint set".to_string(),
            ));
        }
        if !(self.params.resolution > 0.0) {
            return Err(LvisError::InvalidInput(format!(
                "Resolution must be positive, got {}",
                self.params.resolution
            )));
        }
        PointGrid::from_points(x, y, self.params.resolution)
    }
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_elevation(value: f64) -> bool {
    value.is_finite() && value != NO_DATA_ELEVATION
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rasterizer(resolution: f64) -> Rasterizer {
        Rasterizer::with_params(RasterParams {
            resolution,
            epsg: 3031,
        })
    }

    #[test]
    fn test_grid_size_and_transform() {
        let r = rasterizer(10.0);
        let raster = r
            .rasterize(&[0.0, 25.0], &[0.0, 12.0], &[1.0, 2.0])
            .unwrap();
        assert_eq!(raster.width(), 3);
        assert_eq!(raster.height(), 2);
        assert_eq!(raster.transform, GeoTransform::north_up(0.0, 12.0, 10.0));
    }

    #[test]
    fn test_single_footprint_fills_one_pixel() {
        // the no-data footprints only set the extent; the one under test is (17, 3)
        let r = rasterizer(10.0);
        let x = [0.0, 17.0, 29.0];
        let y = [20.0, 3.0, 0.0];
        let v = [NO_DATA_ELEVATION, 42.0, NO_DATA_ELEVATION];
        let raster = r.rasterize(&x, &y, &v).unwrap();
        // rows: [10,20) [0,10) [-10,0); cols [0,10) [10,20) [20,30)
        assert_eq!(raster.data.dim(), (3, 3));
        for ((i, j), &value) in raster.data.indexed_iter() {
            if (i, j) == (1, 1) {
                assert_eq!(value, 42.0);
            } else {
                assert_eq!(value, NO_DATA);
            }
        }
    }

    #[test]
    fn test_two_footprints_average() {
        let r = rasterizer(30.0);
        let raster = r
            .rasterize(&[0.0, 5.0, 100.0], &[0.0, 5.0, 100.0], &[10.0, 20.0, 1.0])
            .unwrap();
        // row 3 covers [-20, 10), column 0 covers [0, 30)
        assert_eq!(raster.data.dim(), (4, 4));
        assert_eq!(raster.data[[3, 0]], 15.0);
        // (100, 100) sits on the north edge and is dropped
        assert_eq!(raster.valid_count(), 1);
    }

    #[test]
    fn test_north_edge_footprint_dropped() {
        let r = rasterizer(10.0);
        let raster = r.rasterize(&[0.0, 5.0], &[0.0, 20.0], &[1.0, 2.0]).unwrap();
        // the footprint on max_y is outside every half-open row window
        assert!(raster.data.iter().all(|&v| v != 2.0));
        assert_eq!(raster.valid_count(), 1);
    }

    #[test]
    fn test_bucketed_matches_direct() {
        let r = rasterizer(7.5);
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut v = Vec::new();
        for k in 0..400 {
            let t = k as f64;
            x.push((t * 13.37) % 97.0);
            y.push((t * 7.91) % 61.0 - 30.0);
            v.push(if k % 17 == 0 { NO_DATA_ELEVATION } else { t * 0.25 });
        }
        // points exactly on window boundaries
        x.push(15.0);
        y.push(0.0);
        v.push(3.0);
        let fast = r.rasterize(&x, &y, &v).unwrap();
        let slow = r.rasterize_direct(&x, &y, &v).unwrap();
        assert_eq!(fast, slow);
    }

    #[test]
    fn test_rejects_bad_input() {
        let r = rasterizer(10.0);
        assert!(r.rasterize(&[], &[], &[]).is_err());
        assert!(r.rasterize(&[0.0], &[0.0, 1.0], &[1.0]).is_err());
        assert!(rasterizer(0.0).rasterize(&[0.0], &[0.0], &[1.0]).is_err());
    }
}
