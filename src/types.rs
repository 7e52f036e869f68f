use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// No-data sentinel shared by ground estimates and rasters
pub const NO_DATA: f32 = -999.0;

/// No-data sentinel for per-footprint ground elevations
pub const NO_DATA_ELEVATION: f64 = -999.0;

/// Default EPSG code of raw LVIS coordinates (geodetic lon/lat)
pub const GEODETIC_EPSG: u32 = 4326;

/// Single-band elevation grid (row, column), row 0 is the northern edge
pub type DemImage = Array2<f32>;

/// Axis-aligned bounding box in whatever CRS the caller works in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Half-open containment `[min_x, max_x) x [min_y, max_y)`
    pub fn contains_half_open(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    /// Closed-interval intersection test
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Smallest box covering both inputs
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Bounding box of paired coordinate slices, ignoring non-finite entries
    pub fn from_points(x: &[f64], y: &[f64]) -> Option<BoundingBox> {
        let mut bbox: Option<BoundingBox> = None;
        for (&px, &py) in x.iter().zip(y.iter()) {
            if !px.is_finite() || !py.is_finite() {
                continue;
            }
            bbox = Some(match bbox {
                None => BoundingBox::new(px, py, px, py),
                Some(b) => BoundingBox {
                    min_x: b.min_x.min(px),
                    min_y: b.min_y.min(py),
                    max_x: b.max_x.max(px),
                    max_y: b.max_y.max(py),
                },
            });
        }
        bbox
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels of size `resolution`
    pub fn north_up(top_left_x: f64, top_left_y: f64, resolution: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: resolution,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -resolution,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the centre of pixel `(row, col)`
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_height < 0.0
    }

    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }
}

/// Grid geometry: transform plus dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    /// Exact extent covered by the grid
    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x_end = t.top_left_x + self.width as f64 * t.pixel_width;
        let y_end = t.top_left_y + self.height as f64 * t.pixel_height;
        BoundingBox {
            min_x: t.top_left_x.min(x_end),
            min_y: t.top_left_y.min(y_end),
            max_x: t.top_left_x.max(x_end),
            max_y: t.top_left_y.max(y_end),
        }
    }
}

/// Single-band raster with geolocation and a no-data sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: DemImage,
    pub transform: GeoTransform,
    pub nodata: f32,
    pub epsg: u32,
}

impl Raster {
    pub fn new(data: DemImage, transform: GeoTransform, epsg: u32) -> Self {
        Self {
            data,
            transform,
            nodata: NO_DATA,
            epsg,
        }
    }

    /// Raster of the given grid with every pixel set to no-data
    pub fn empty(grid: &GridSpec, epsg: u32) -> Self {
        Self::new(
            Array2::from_elem((grid.height, grid.width), NO_DATA),
            grid.transform,
            epsg,
        )
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn grid(&self) -> GridSpec {
        GridSpec {
            transform: self.transform,
            width: self.width(),
            height: self.height(),
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid().bounds()
    }

    /// True when `value` is a usable measurement for this raster
    pub fn is_valid(&self, value: f32) -> bool {
        value.is_finite() && value != self.nodata
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| self.is_valid(v)).count()
    }

    /// Identical transform and dimensions
    pub fn same_grid(&self, other: &Raster) -> bool {
        self.grid() == other.grid()
    }
}

/// Error types for LVIS processing
#[derive(Debug, thiserror::Error)]
pub enum LvisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Grid mismatch: expected {expected}, found {found}")]
    GridMismatch { expected: String, found: String },

    #[error("Interpolation error: {0}")]
    Interpolation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for LVIS operations
pub type LvisResult<T> = Result<T, LvisError>;
