use crate::types::{BoundingBox, GeoTransform, GridSpec, LvisError, LvisResult, Raster};
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which value wins where tiles overlap.
///
/// Tiles produced from disjoint footprint subsets can still overlap by a
/// pixel at their shared edges; the policy decides those pixels. No-data
/// never overwrites a valid value under any policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Earliest tile in manifest order keeps the pixel
    FirstValid,
    /// Latest tile in manifest order overwrites the pixel
    LastValid,
    /// Average of all valid contributions
    Mean,
}

/// Mosaicking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicParams {
    /// Tiles merged per batch before the batch outputs are merged
    pub batch_size: usize,
    pub overlap: OverlapPolicy,
    /// Output pixel size; defaults to the first tile's pixel width
    pub resolution: Option<f64>,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            batch_size: 10,
            overlap: OverlapPolicy::LastValid,
            resolution: None,
        }
    }
}

/// Identifies one stored tile and its grid without loading pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileHandle {
    pub id: String,
    pub grid: GridSpec,
    pub epsg: u32,
}

impl TileHandle {
    pub fn for_raster(id: impl Into<String>, raster: &Raster) -> Self {
        Self {
            id: id.into(),
            grid: raster.grid(),
            epsg: raster.epsg,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid.bounds()
    }
}

/// Ordered list of tiles handed between pipeline stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileManifest {
    tiles: Vec<TileHandle>,
}

impl TileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: TileHandle) {
        self.tiles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn handles(&self) -> &[TileHandle] {
        &self.tiles
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileHandle> {
        self.tiles.iter()
    }
}

impl From<Vec<TileHandle>> for TileManifest {
    fn from(tiles: Vec<TileHandle>) -> Self {
        Self { tiles }
    }
}

/// Persistence for tiles referenced by a manifest
pub trait TileStore {
    fn load(&self, handle: &TileHandle) -> LvisResult<Raster>;

    fn store(&mut self, id: &str, raster: &Raster) -> LvisResult<TileHandle>;
}

/// Tiles kept in memory, keyed by id
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: HashMap<String, Raster>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileStore for MemoryTileStore {
    fn load(&self, handle: &TileHandle) -> LvisResult<Raster> {
        self.tiles
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| LvisError::InvalidInput(format!("Unknown tile {}", handle.id)))
    }

    fn store(&mut self, id: &str, raster: &Raster) -> LvisResult<TileHandle> {
        self.tiles.insert(id.to_string(), raster.clone());
        Ok(TileHandle::for_raster(id, raster))
    }
}

/// Pixel lattice shared by every stage of one mosaic
#[derive(Debug, Clone, Copy)]
struct Lattice {
    origin_x: f64,
    origin_y: f64,
    resolution: f64,
}

impl Lattice {
    // tolerance in pixel units when snapping extents onto the lattice
    const SNAP: f64 = 1e-6;

    fn grid_for(&self, bounds: &BoundingBox) -> GridSpec {
        let res = self.resolution;
        let c0 = ((bounds.min_x - self.origin_x) / res + Self::SNAP).floor() as i64;
        let c1 = ((bounds.max_x - self.origin_x) / res - Self::SNAP).ceil() as i64;
        let r0 = ((self.origin_y - bounds.max_y) / res + Self::SNAP).floor() as i64;
        let r1 = ((self.origin_y - bounds.min_y) / res - Self::SNAP).ceil() as i64;

        GridSpec {
            transform: GeoTransform::north_up(
                self.origin_x + c0 as f64 * res,
                self.origin_y - r0 as f64 * res,
                res,
            ),
            width: (c1 - c0).max(1) as usize,
            height: (r1 - r0).max(1) as usize,
        }
    }
}

/// Mosaic under construction: winning values plus sums and counts, so
/// partial results can be merged again without losing information
#[derive(Debug, Clone)]
struct PartialMosaic {
    grid: GridSpec,
    value: Array2<f32>,
    sum: Array2<f64>,
    count: Array2<u32>,
}

impl PartialMosaic {
    fn empty(grid: GridSpec) -> Self {
        let shape = (grid.height, grid.width);
        Self {
            grid,
            value: Array2::zeros(shape),
            sum: Array2::zeros(shape),
            count: Array2::zeros(shape),
        }
    }

    fn from_raster(raster: &Raster) -> Self {
        let valid = raster.data.mapv(|v| raster.is_valid(v));
        Self {
            grid: raster.grid(),
            value: raster.data.mapv(|v| if raster.is_valid(v) { v } else { 0.0 }),
            sum: raster.data.mapv(|v| if raster.is_valid(v) { v as f64 } else { 0.0 }),
            count: valid.mapv(u32::from),
        }
    }

    /// Nearest-neighbour sample `src` onto this grid; returns overlapping pixels
    fn absorb(&mut self, src: &PartialMosaic, policy: OverlapPolicy) -> usize {
        let t = self.grid.transform;
        let st = src.grid.transform;
        let sb = src.grid.bounds();
        let res_x = t.pixel_width;
        let res_y = -t.pixel_height;

        let c0 = clamp_index(((sb.min_x - t.top_left_x) / res_x).floor(), self.grid.width);
        let c1 = clamp_index(((sb.max_x - t.top_left_x) / res_x).ceil(), self.grid.width);
        let r0 = clamp_index(((t.top_left_y - sb.max_y) / res_y).floor(), self.grid.height);
        let r1 = clamp_index(((t.top_left_y - sb.min_y) / res_y).ceil(), self.grid.height);

        let mut overlaps = 0;
        for r in r0..r1 {
            for c in c0..c1 {
                let (cx, cy) = t.pixel_center(r, c);
                let sc = ((cx - st.top_left_x) / st.pixel_width).floor();
                let sr = ((cy - st.top_left_y) / st.pixel_height).floor();
                if sc < 0.0 || sr < 0.0 {
                    continue;
                }
                let (sr, sc) = (sr as usize, sc as usize);
                if sr >= src.grid.height || sc >= src.grid.width || src.count[[sr, sc]] == 0 {
                    continue;
                }

                let occupied = self.count[[r, c]] > 0;
                if occupied {
                    overlaps += 1;
                }
                match policy {
                    OverlapPolicy::FirstValid if occupied => {}
                    OverlapPolicy::FirstValid | OverlapPolicy::LastValid => {
                        self.value[[r, c]] = src.value[[sr, sc]];
                    }
                    OverlapPolicy::Mean => {}
                }
                self.sum[[r, c]] += src.sum[[sr, sc]];
                self.count[[r, c]] += src.count[[sr, sc]];
            }
        }
        overlaps
    }

    fn into_raster(self, policy: OverlapPolicy, epsg: u32) -> Raster {
        let nodata = crate::types::NO_DATA;
        let data = Array2::from_shape_fn(self.value.dim(), |idx| {
            let n = self.count[idx];
            if n == 0 {
                nodata
            } else if policy == OverlapPolicy::Mean {
                (self.sum[idx] / n as f64) as f32
            } else {
                self.value[idx]
            }
        });
        Raster::new(data, self.grid.transform, epsg)
    }
}

fn clamp_index(value: f64, max: usize) -> usize {
    value.max(0.0).min(max as f64) as usize
}

/// Tile and conflict counts of one merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    pub tiles: usize,
    /// Pixels written by more than one tile, at any merge stage
    pub overlaps: usize,
}

/// Merges, clips and regrids DEM tiles
pub struct MosaicEngine {
    params: MosaicParams,
}

impl MosaicEngine {
    /// Create a mosaic engine with default parameters
    pub fn new() -> Self {
        Self {
            params: MosaicParams::default(),
        }
    }

    /// Create a mosaic engine with custom parameters
    pub fn with_params(params: MosaicParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MosaicParams {
        &self.params
    }

    /// Merge in-memory tiles in one pass, in slice order
    pub fn merge(&self, tiles: &[Raster]) -> LvisResult<Raster> {
        self.merge_with_summary(tiles).map(|(raster, _)| raster)
    }

    /// [`MosaicEngine::merge`], also returning the overlap count
    pub fn merge_with_summary(&self, tiles: &[Raster]) -> LvisResult<(Raster, MergeSummary)> {
        let first = tiles
            .first()
            .ok_or_else(|| LvisError::InvalidInput("No tiles to merge".to_string()))?;
        let lattice = self.lattice(&first.grid())?;
        for tile in tiles {
            Self::check_tile(&tile.grid(), tile.epsg, first.epsg)?;
        }

        let bounds = tiles
            .iter()
            .skip(1)
            .fold(first.bounds(), |acc, t| acc.union(&t.bounds()));
        let mut mosaic = PartialMosaic::empty(lattice.grid_for(&bounds));
        let mut overlaps = 0;
        for tile in tiles {
            overlaps += mosaic.absorb(&PartialMosaic::from_raster(tile), self.params.overlap);
        }
        let summary = MergeSummary {
            tiles: tiles.len(),
            overlaps,
        };
        self.report(&summary);

        Ok((mosaic.into_raster(self.params.overlap, first.epsg), summary))
    }

    /// Merge the tiles of a manifest in groups of `batch_size`, then merge the
    /// group outputs the same way until one mosaic is left.
    ///
    /// Only one input tile is loaded at a time. All stages share one pixel
    /// lattice, so the result matches [`MosaicEngine::merge`] on the same
    /// tiles in the same order.
    pub fn merge_batched<S: TileStore + ?Sized>(
        &self,
        store: &S,
        manifest: &TileManifest,
    ) -> LvisResult<Raster> {
        self.merge_batched_with_summary(store, manifest)
            .map(|(raster, _)| raster)
    }

    /// [`MosaicEngine::merge_batched`], also returning the overlap count of
    /// every stage
    pub fn merge_batched_with_summary<S: TileStore + ?Sized>(
        &self,
        store: &S,
        manifest: &TileManifest,
    ) -> LvisResult<(Raster, MergeSummary)> {
        let handles = manifest.handles();
        let first = handles
            .first()
            .ok_or_else(|| LvisError::InvalidInput("Manifest holds no tiles".to_string()))?;
        if self.params.batch_size == 0 {
            return Err(LvisError::InvalidInput(
                "Mosaic batch size must be at least 1".to_string(),
            ));
        }
        let lattice = self.lattice(&first.grid)?;
        for handle in handles {
            Self::check_tile(&handle.grid, handle.epsg, first.epsg)?;
        }

        log::info!(
            "Merging {} tiles in batches of {}",
            handles.len(),
            self.params.batch_size
        );

        let mut overlaps = 0;
        let mut partials = Vec::new();
        for (batch_index, batch) in handles.chunks(self.params.batch_size).enumerate() {
            let bounds = batch
                .iter()
                .skip(1)
                .fold(batch[0].bounds(), |acc, h| acc.union(&h.bounds()));
            let mut partial = PartialMosaic::empty(lattice.grid_for(&bounds));
            for handle in batch {
                let raster = store.load(handle)?;
                if raster.grid() != handle.grid {
                    return Err(LvisError::GridMismatch {
                        expected: format!("{:?}", handle.grid),
                        found: format!("{:?}", raster.grid()),
                    });
                }
                overlaps += partial.absorb(&PartialMosaic::from_raster(&raster), self.params.overlap);
            }
            log::debug!(
                "Batch {}: {} tiles -> {}x{} grid",
                batch_index,
                batch.len(),
                partial.grid.width,
                partial.grid.height
            );
            partials.push(partial);
        }

        let group = self.params.batch_size.max(2);
        let mut stage = 1;
        while partials.len() > 1 {
            stage += 1;
            log::debug!("Merge stage {}: {} partial mosaics", stage, partials.len());
            let mut next = Vec::with_capacity(partials.len() / group + 1);
            let mut remaining = partials.into_iter();
            loop {
                let chunk: Vec<PartialMosaic> = remaining.by_ref().take(group).collect();
                if chunk.is_empty() {
                    break;
                }
                let bounds = chunk
                    .iter()
                    .skip(1)
                    .fold(chunk[0].grid.bounds(), |acc, p| acc.union(&p.grid.bounds()));
                let mut merged = PartialMosaic::empty(lattice.grid_for(&bounds));
                for part in &chunk {
                    overlaps += merged.absorb(part, self.params.overlap);
                }
                next.push(merged);
            }
            partials = next;
        }
        let summary = MergeSummary {
            tiles: handles.len(),
            overlaps,
        };
        self.report(&summary);

        let mosaic = partials
            .pop()
            .ok_or_else(|| LvisError::Processing("Batched merge produced no output".to_string()))?;
        Ok((mosaic.into_raster(self.params.overlap, first.epsg), summary))
    }

    /// Tiles whose extent intersects `region`
    pub fn filter_tiles(&self, manifest: &TileManifest, region: &BoundingBox) -> TileManifest {
        let kept: Vec<TileHandle> = manifest
            .iter()
            .filter(|h| h.bounds().intersects(region))
            .cloned()
            .collect();
        log::info!("Tiles in range of study area: {} of {}", kept.len(), manifest.len());
        TileManifest::from(kept)
    }

    /// Crop to the boundary's bounding box and blank pixels whose centre
    /// lies outside the boundary
    pub fn clip(&self, raster: &Raster, boundary: &MultiPolygon<f64>) -> LvisResult<Raster> {
        let t = raster.transform;
        if !t.is_north_up() {
            return Err(LvisError::InvalidInput(
                "Only north-up rasters can be clipped".to_string(),
            ));
        }
        let rect = boundary
            .bounding_rect()
            .ok_or_else(|| LvisError::InvalidInput("Boundary polygon is empty".to_string()))?;
        let res_x = t.pixel_width;
        let res_y = -t.pixel_height;

        let c0 = clamp_index(((rect.min().x - t.top_left_x) / res_x).floor(), raster.width());
        let c1 = clamp_index(((rect.max().x - t.top_left_x) / res_x).ceil(), raster.width());
        let r0 = clamp_index(((t.top_left_y - rect.max().y) / res_y).floor(), raster.height());
        let r1 = clamp_index(((t.top_left_y - rect.min().y) / res_y).ceil(), raster.height());
        if c0 >= c1 || r0 >= r1 {
            return Err(LvisError::InvalidInput(
                "Boundary does not overlap the raster".to_string(),
            ));
        }

        let transform = GeoTransform {
            top_left_x: t.top_left_x + c0 as f64 * t.pixel_width,
            top_left_y: t.top_left_y + r0 as f64 * t.pixel_height,
            ..t
        };
        let window = raster.data.slice(s![r0..r1, c0..c1]);
        let data = Array2::from_shape_fn(window.dim(), |(i, j)| {
            let (x, y) = transform.pixel_center(i, j);
            if boundary.contains(&Point::new(x, y)) {
                window[[i, j]]
            } else {
                raster.nodata
            }
        });

        let clipped = Raster {
            data,
            transform,
            nodata: raster.nodata,
            epsg: raster.epsg,
        };
        log::info!(
            "Clipped {}x{} raster to {}x{} ({} valid pixels)",
            raster.width(),
            raster.height(),
            clipped.width(),
            clipped.height(),
            clipped.valid_count()
        );
        Ok(clipped)
    }

    /// Nearest-neighbour resample of `raster` onto `reference`'s grid
    pub fn resample_to_reference(&self, raster: &Raster, reference: &Raster) -> LvisResult<Raster> {
        if raster.epsg != reference.epsg {
            return Err(LvisError::InvalidInput(format!(
                "Raster in EPSG:{} must be reprojected to EPSG:{} before resampling",
                raster.epsg, reference.epsg
            )));
        }
        if raster.same_grid(reference) {
            return Ok(raster.clone());
        }
        log::debug!(
            "Resampling {}x{} raster onto {}x{} reference grid",
            raster.width(),
            raster.height(),
            reference.width(),
            reference.height()
        );

        let st = raster.transform;
        let rt = reference.transform;
        let data = Array2::from_shape_fn((reference.height(), reference.width()), |(r, c)| {
            let (cx, cy) = rt.pixel_center(r, c);
            let sc = ((cx - st.top_left_x) / st.pixel_width).floor();
            let sr = ((cy - st.top_left_y) / st.pixel_height).floor();
            if sc < 0.0 || sr < 0.0 {
                return raster.nodata;
            }
            let (sr, sc) = (sr as usize, sc as usize);
            if sr < raster.height() && sc < raster.width() {
                raster.data[[sr, sc]]
            } else {
                raster.nodata
            }
        });

        Ok(Raster {
            data,
            transform: rt,
            nodata: raster.nodata,
            epsg: raster.epsg,
        })
    }

    fn lattice(&self, first: &GridSpec) -> LvisResult<Lattice> {
        let t = first.transform;
        if !t.is_north_up() {
            return Err(LvisError::InvalidInput(
                "Only north-up tiles can be mosaicked".to_string(),
            ));
        }
        let resolution = self.params.resolution.unwrap_or(t.pixel_width);
        if !(resolution > 0.0) {
            return Err(LvisError::InvalidInput(format!(
                "Mosaic resolution must be positive, got {}",
                resolution
            )));
        }
        Ok(Lattice {
            origin_x: t.top_left_x,
            origin_y: t.top_left_y,
            resolution,
        })
    }

    fn check_tile(grid: &GridSpec, epsg: u32, expected_epsg: u32) -> LvisResult<()> {
        if !grid.transform.is_north_up() || grid.transform.pixel_width <= 0.0 {
            return Err(LvisError::InvalidInput(
                "Only north-up tiles can be mosaicked".to_string(),
            ));
        }
        if epsg != expected_epsg {
            return Err(LvisError::InvalidInput(format!(
                "Tile in EPSG:{} cannot join a mosaic in EPSG:{}",
                epsg, expected_epsg
            )));
        }
        Ok(())
    }

    fn report(&self, summary: &MergeSummary) {
        if summary.overlaps > 0 {
            log::warn!(
                "{} overlapping pixels resolved with {:?} while merging {} tiles",
                summary.overlaps,
                self.params.overlap,
                summary.tiles
            );
        }
        log::info!("Merged {} tiles", summary.tiles);
    }
}

impl Default for MosaicEngine {
    fn default() -> Self {
        Self::new()
    }
}
