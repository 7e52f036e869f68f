use crate::types::{LvisError, LvisResult, Raster};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use spade::{DelaunayTriangulation, FloatTriangulation, HasPosition, Point2, Triangulation};

/// Interpolation used to fill no-data pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GapFillMethod {
    /// Barycentric interpolation over a Delaunay triangulation of valid
    /// pixel centres; nothing is filled outside their convex hull
    Linear,
    /// Inverse-distance-squared mean of valid pixels within `max_radius` pixels
    DistanceLimited { max_radius: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapFillParams {
    pub enabled: bool,
    pub method: GapFillMethod,
    /// Values below this floor are treated as missing
    pub validity_floor: Option<f32>,
}

impl Default for GapFillParams {
    fn default() -> Self {
        Self {
            enabled: false,
            method: GapFillMethod::Linear,
            validity_floor: Some(20.0),
        }
    }
}

struct ValidPixel {
    position: Point2<f64>,
    value: f64,
}

impl HasPosition for ValidPixel {
    type Scalar = f64;

    fn position(&self) -> Point2<f64> {
        self.position
    }
}

/// Fills no-data holes in a DEM from surrounding valid pixels
pub struct GapFiller {
    params: GapFillParams,
}

impl GapFiller {
    /// Create a new gap filler with default parameters
    pub fn new() -> Self {
        Self {
            params: GapFillParams::default(),
        }
    }

    /// Create a new gap filler with custom parameters
    pub fn with_params(params: GapFillParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GapFillParams {
        &self.params
    }

    /// Pixels that count as measurements: not no-data and not under the floor
    pub fn validity_mask(&self, raster: &Raster) -> Array2<bool> {
        let floor = self.params.validity_floor;
        raster
            .data
            .mapv(|v| raster.is_valid(v) && floor.map_or(true, |f| v >= f))
    }

    /// Fill every invalid pixel the configured method can reach.
    ///
    /// Valid pixels are copied unchanged; unreachable holes keep the
    /// raster's no-data value.
    pub fn fill(&self, raster: &Raster) -> LvisResult<Raster> {
        let valid = self.validity_mask(raster);
        let holes: Vec<(usize, usize)> = valid
            .indexed_iter()
            .filter(|(_, &ok)| !ok)
            .map(|(idx, _)| idx)
            .collect();
        let valid_count = valid.len() - holes.len();

        let mut out = raster.clone();
        for &(r, c) in &holes {
            out.data[[r, c]] = raster.nodata;
        }
        if holes.is_empty() {
            return Ok(out);
        }
        if valid_count == 0 {
            log::warn!("No valid pixels to interpolate from, raster left unfilled");
            return Ok(out);
        }

        log::debug!(
            "Gap filling {} holes from {} valid pixels with {:?}",
            holes.len(),
            valid_count,
            self.params.method
        );
        let filled = match self.params.method {
            GapFillMethod::Linear => Self::fill_linear(raster, &valid, &holes, &mut out.data)?,
            GapFillMethod::DistanceLimited { max_radius } => {
                if !(max_radius > 0.0) {
                    return Err(LvisError::InvalidInput(format!(
                        "Gap fill radius must be positive, got {}",
                        max_radius
                    )));
                }
                Self::fill_distance_limited(raster, &valid, &holes, max_radius, &mut out.data)
            }
        };

        let unfilled = holes.len() - filled;
        log::info!("Gap filling filled {} of {} pixels", filled, holes.len());
        if unfilled > 0 {
            log::warn!("{} pixels remain no-data after gap filling", unfilled);
        }
        Ok(out)
    }

    // interpolation runs in (col, row) pixel space, equivalent to map space
    // for a north-up affine grid
    fn fill_linear(
        raster: &Raster,
        valid: &Array2<bool>,
        holes: &[(usize, usize)],
        out: &mut Array2<f32>,
    ) -> LvisResult<usize> {
        let vertices: Vec<ValidPixel> = valid
            .indexed_iter()
            .filter(|(_, &ok)| ok)
            .map(|((r, c), _)| ValidPixel {
                position: Point2::new(c as f64, r as f64),
                value: raster.data[[r, c]] as f64,
            })
            .collect();

        let triangulation: DelaunayTriangulation<ValidPixel> =
            DelaunayTriangulation::bulk_load(vertices)
                .map_err(|e| LvisError::Interpolation(format!("Triangulation failed: {:?}", e)))?;
        let barycentric = triangulation.barycentric();

        let mut filled = 0;
        for &(r, c) in holes {
            if let Some(v) =
                barycentric.interpolate(|vertex| vertex.data().value, Point2::new(c as f64, r as f64))
            {
                out[[r, c]] = v as f32;
                filled += 1;
            }
        }
        Ok(filled)
    }

    fn fill_distance_limited(
        raster: &Raster,
        valid: &Array2<bool>,
        holes: &[(usize, usize)],
        max_radius: f64,
        out: &mut Array2<f32>,
    ) -> usize {
        let (height, width) = valid.dim();
        // no neighbour lies further away than the raster diagonal
        let reach = max_radius.min((height + width) as f64).ceil() as usize;
        let max_d2 = max_radius * max_radius;

        let mut filled = 0;
        for &(r, c) in holes {
            let mut weighted = 0.0;
            let mut weights = 0.0;
            for rr in r.saturating_sub(reach)..r.saturating_add(reach).saturating_add(1).min(height) {
                for cc in c.saturating_sub(reach)..c.saturating_add(reach).saturating_add(1).min(width) {
                    if !valid[[rr, cc]] {
                        continue;
                    }
                    let dr = rr as f64 - r as f64;
                    let dc = cc as f64 - c as f64;
                    let d2 = dr * dr + dc * dc;
                    if d2 > max_d2 {
                        continue;
                    }
                    let w = 1.0 / d2;
                    weighted += w * raster.data[[rr, cc]] as f64;
                    weights += w;
                }
            }
            if weights > 0.0 {
                out[[r, c]] = (weighted / weights) as f32;
                filled += 1;
            }
        }
        filled
    }
}

impl Default for GapFiller {
    fn default() -> Self {
        Self::new()
    }
}
