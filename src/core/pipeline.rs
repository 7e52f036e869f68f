//! Flight-to-DEM driver.
//!
//! A flight is cut into subsets by a [`TilePlan`]; each subset becomes one
//! DEM tile (ground finding plus rasterization), tiles go to a
//! [`TileStore`] and are listed in a [`TileManifest`], and the manifest is
//! then merged, clipped and optionally gap filled into one DEM. Only one
//! batch of subsets is held in memory at a time.

use crate::config::PipelineConfig;
use crate::core::change::{ChangeAnalyzer, ChangeReport};
use crate::core::gap_fill::GapFiller;
use crate::core::ground::GroundEstimator;
use crate::core::mosaic::{MosaicEngine, TileManifest, TileStore};
use crate::core::rasterize::Rasterizer;
use crate::io::boundary::boundary_bounds;
use crate::io::lvis::{WaveformSource, WaveformStore};
use crate::io::reproject::{reproject_points, CoordinateTransform};
use crate::types::{BoundingBox, LvisError, LvisResult, Raster};
use geo::MultiPolygon;

/// Spatial subsets covering a flight
#[derive(Debug, Clone)]
pub struct TilePlan {
    /// Edge length of one subset, in source coordinates
    pub subset_size: f64,
    pub boxes: Vec<BoundingBox>,
}

impl TilePlan {
    /// Square subsets of edge `width / subdivisions` starting at the
    /// flight's min corner, columns outer and rows inner. The last column
    /// and row are one edge wider so points on the max edges are kept.
    pub fn from_bounds(bounds: &BoundingBox, subdivisions: usize) -> LvisResult<Self> {
        if subdivisions == 0 {
            return Err(LvisError::InvalidInput(
                "Tile plan needs at least one subdivision".to_string(),
            ));
        }
        let size = bounds.width() / subdivisions as f64;
        if !(size > 0.0 && size.is_finite()) {
            return Err(LvisError::InvalidInput(format!(
                "Cannot tile a flight of width {}",
                bounds.width()
            )));
        }

        let x_starts = starts(bounds.min_x, bounds.max_x, size);
        let y_starts = starts(bounds.min_y, bounds.max_y, size);
        let mut boxes = Vec::with_capacity(x_starts.len() * y_starts.len());
        // each box ends exactly where the next begins
        let end = |starts: &[f64], k: usize| match starts.get(k + 1) {
            Some(&next) => next,
            None => starts[k] + 2.0 * size,
        };
        for i in 0..x_starts.len() {
            for j in 0..y_starts.len() {
                boxes.push(BoundingBox::new(
                    x_starts[i],
                    y_starts[j],
                    end(&x_starts, i),
                    end(&y_starts, j),
                ));
            }
        }
        log::debug!(
            "Tile plan: {}x{} subsets of {:.4}",
            x_starts.len(),
            y_starts.len(),
            size
        );
        Ok(Self {
            subset_size: size,
            boxes,
        })
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

fn starts(min: f64, max: f64, step: f64) -> Vec<f64> {
    let mut out: Vec<f64> = (0..)
        .map(|k| min + k as f64 * step)
        .take_while(|&s| s < max)
        .collect();
    if out.is_empty() {
        // flat extent along this axis
        out.push(min);
    }
    out
}

/// DEM produced from one flight subset
#[derive(Debug, Clone)]
pub struct DemTile {
    pub id: String,
    pub raster: Raster,
    pub footprint_count: usize,
    pub valid_ground_count: usize,
}

/// End-to-end processing with one configuration and one output CRS
pub struct DemPipeline {
    config: PipelineConfig,
    transform: Box<dyn CoordinateTransform>,
}

impl DemPipeline {
    pub fn new(config: PipelineConfig, transform: Box<dyn CoordinateTransform>) -> LvisResult<Self> {
        if transform.target_epsg() != config.raster.epsg {
            return Err(LvisError::InvalidInput(format!(
                "Coordinate transform targets EPSG:{} but rasters are configured for EPSG:{}",
                transform.target_epsg(),
                config.raster.epsg
            )));
        }
        Ok(Self { config, transform })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ground-find and rasterize the footprints inside `bbox`; `None` when
    /// the subset is empty
    pub fn process_subset<S: WaveformSource + ?Sized>(
        &self,
        store: &WaveformStore<'_, S>,
        id: &str,
        bbox: &BoundingBox,
    ) -> LvisResult<Option<DemTile>> {
        let subset = store.subset(bbox)?;
        if subset.is_empty() {
            log::debug!("Subset {} is empty, skipping", id);
            return Ok(None);
        }

        let ground = GroundEstimator::with_params(self.config.ground.clone()).estimate(&subset)?;
        let (x, y) = reproject_points(self.transform.as_ref(), subset.longitudes(), subset.latitudes())?;
        let raster = Rasterizer::with_params(self.config.raster.clone()).rasterize(&x, &y, &ground.values)?;

        log::info!(
            "Tile {}: {} footprints, {} with ground, {}x{} pixels",
            id,
            subset.len(),
            ground.valid_count(),
            raster.width(),
            raster.height()
        );
        Ok(Some(DemTile {
            id: id.to_string(),
            raster,
            footprint_count: subset.len(),
            valid_ground_count: ground.valid_count(),
        }))
    }

    /// Process every subset of a flight into `tiles`, returning the manifest
    /// in plan order
    pub fn process_flight<S, T>(&self, source: &S, tiles: &mut T) -> LvisResult<TileManifest>
    where
        S: WaveformSource + Sync + ?Sized,
        T: TileStore + ?Sized,
    {
        let store = WaveformStore::open(source)?;
        let bounds = match store.bounds() {
            Some(b) => b,
            None => {
                log::warn!("Flight {} has no footprints", store.name());
                return Ok(TileManifest::new());
            }
        };
        let plan = TilePlan::from_bounds(&bounds, self.config.tiling.subdivisions)?;
        let jobs: Vec<(String, BoundingBox)> = plan
            .boxes
            .iter()
            .enumerate()
            .map(|(k, b)| (format!("{}_{:04}", store.name(), k), *b))
            .collect();
        log::info!("Flight {}: {} subsets planned", store.name(), jobs.len());

        let mut manifest = TileManifest::new();
        let mut failed = 0;
        for batch in jobs.chunks(Self::batch_width()) {
            for ((id, _), result) in batch.iter().zip(self.process_batch(&store, batch)) {
                match result {
                    Ok(Some(tile)) => manifest.push(tiles.store(&tile.id, &tile.raster)?),
                    Ok(None) => {}
                    Err(e) if self.config.skip_failed => {
                        log::warn!("Skipping subset {}: {}", id, e);
                        failed += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        log::info!(
            "Flight {}: {} tiles written, {} subsets failed",
            store.name(),
            manifest.len(),
            failed
        );
        Ok(manifest)
    }

    #[cfg(feature = "parallel")]
    fn batch_width() -> usize {
        rayon::current_num_threads().max(1)
    }

    #[cfg(not(feature = "parallel"))]
    fn batch_width() -> usize {
        1
    }

    #[cfg(feature = "parallel")]
    fn process_batch<S: WaveformSource + Sync + ?Sized>(
        &self,
        store: &WaveformStore<'_, S>,
        batch: &[(String, BoundingBox)],
    ) -> Vec<LvisResult<Option<DemTile>>> {
        use rayon::prelude::*;

        batch
            .par_iter()
            .map(|(id, bbox)| self.process_subset(store, id, bbox))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn process_batch<S: WaveformSource + ?Sized>(
        &self,
        store: &WaveformStore<'_, S>,
        batch: &[(String, BoundingBox)],
    ) -> Vec<LvisResult<Option<DemTile>>> {
        batch
            .iter()
            .map(|(id, bbox)| self.process_subset(store, id, bbox))
            .collect()
    }

    /// Merge the manifest into one DEM.
    ///
    /// With a boundary (already in the raster CRS) only intersecting tiles
    /// are merged and the result is clipped to it; gap filling runs after
    /// the clip and is clipped again so no value lands outside the boundary.
    pub fn build_mosaic<T: TileStore + ?Sized>(
        &self,
        tiles: &T,
        manifest: &TileManifest,
        boundary: Option<&MultiPolygon<f64>>,
    ) -> LvisResult<Raster> {
        let engine = MosaicEngine::with_params(self.config.mosaic.clone());

        let selected = match boundary {
            Some(polygon) => {
                let region = boundary_bounds(polygon).ok_or_else(|| {
                    LvisError::InvalidInput("Boundary polygon is empty".to_string())
                })?;
                engine.filter_tiles(manifest, &region)
            }
            None => manifest.clone(),
        };
        if selected.is_empty() {
            return Err(LvisError::InvalidInput(
                "No tiles overlap the study area".to_string(),
            ));
        }

        let mut dem = engine.merge_batched(tiles, &selected)?;
        if let Some(polygon) = boundary {
            dem = engine.clip(&dem, polygon)?;
        }
        if self.config.gap_fill.enabled {
            dem = GapFiller::with_params(self.config.gap_fill.clone()).fill(&dem)?;
            if let Some(polygon) = boundary {
                dem = engine.clip(&dem, polygon)?;
            }
        }

        let total = dem.data.len();
        log::info!(
            "DEM {}x{}: {:.1}% coverage",
            dem.width(),
            dem.height(),
            100.0 * dem.valid_count() as f64 / total.max(1) as f64
        );
        Ok(dem)
    }

    /// Resample `later` onto `earlier`'s grid, then difference and summarise
    pub fn compare_epochs(&self, later: &Raster, earlier: &Raster) -> LvisResult<ChangeReport> {
        let engine = MosaicEngine::with_params(self.config.mosaic.clone());
        let aligned = engine.resample_to_reference(later, earlier)?;
        ChangeAnalyzer::with_params(self.config.change.clone()).analyze(&aligned, earlier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reproject::IdentityTransform;

    #[test]
    fn test_plan_layout() {
        let plan = TilePlan::from_bounds(&BoundingBox::new(0.0, 0.0, 160.0, 80.0), 16).unwrap();
        assert_eq!(plan.subset_size, 10.0);
        assert_eq!(plan.len(), 16 * 8);
        assert_eq!(plan.boxes[0], BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        // columns outer, rows inner; last row widened
        assert_eq!(plan.boxes[7], BoundingBox::new(0.0, 70.0, 10.0, 90.0));
        assert_eq!(plan.boxes[plan.len() - 1], BoundingBox::new(150.0, 70.0, 170.0, 90.0));
    }

    #[test]
    fn test_plan_assigns_every_point_once() {
        let bounds = BoundingBox::new(-3.0, 2.0, 17.0, 9.5);
        let plan = TilePlan::from_bounds(&bounds, 7).unwrap();
        let mut points = vec![(bounds.max_x, bounds.max_y), (bounds.min_x, bounds.min_y)];
        for k in 0..200 {
            let t = k as f64;
            points.push((-3.0 + (t * 1.37) % 20.0, 2.0 + (t * 0.91) % 7.5));
        }
        for (x, y) in points {
            let hits = plan.boxes.iter().filter(|b| b.contains_half_open(x, y)).count();
            assert_eq!(hits, 1, "point ({}, {})", x, y);
        }
    }

    #[test]
    fn test_plan_flat_extent() {
        let plan = TilePlan::from_bounds(&BoundingBox::new(0.0, 5.0, 40.0, 5.0), 4).unwrap();
        assert_eq!(plan.len(), 4);
        assert!(plan.boxes.iter().any(|b| b.contains_half_open(40.0, 5.0)));
    }

    #[test]
    fn test_plan_rejects_degenerate_input() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(TilePlan::from_bounds(&b, 0).is_err());
        assert!(TilePlan::from_bounds(&BoundingBox::new(1.0, 0.0, 1.0, 10.0), 4).is_err());
    }

    #[test]
    fn test_pipeline_rejects_crs_mismatch() {
        let config = PipelineConfig::default();
        assert!(DemPipeline::new(config.clone(), Box::new(IdentityTransform::new(4326))).is_err());
        assert!(DemPipeline::new(config, Box::new(IdentityTransform::new(3031))).is_ok());
    }
}
