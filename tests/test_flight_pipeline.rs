use geo::{polygon, MultiPolygon};
use lvisdem::core::mosaic::{MemoryTileStore, TileStore};
use lvisdem::core::waveform::linspace;
use lvisdem::io::lvis::{FlightCoordinates, FootprintArrays};
use lvisdem::{
    DemPipeline, IdentityTransform, LvisError, LvisResult, MemoryWaveformSource, PipelineConfig,
    Raster, WaveformSource,
};
use ndarray::Array2;

const SIDE: usize = 8;
const SPACING: f64 = 30.0;
const N_BINS: usize = 100;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Waveform bin holding the ground return of footprint (row, col)
fn ground_bin(row: usize, col: usize, shift: usize) -> usize {
    40 + (row + col) % 5 + shift
}

fn expected_ground(row: usize, col: usize, shift: usize) -> f64 {
    linspace(100.0, 0.0, N_BINS)[ground_bin(row, col, shift)]
}

/// 8x8 footprints on a 30 m lattice starting at (15, 15), projected metres.
///
/// Every waveform carries alternating 1/3 noise in its first ten bins, a
/// flat background of 2 and a five-bin return of 50 centred on its ground bin.
fn synthetic_flight(name: &str, shift: usize) -> MemoryWaveformSource {
    let n = SIDE * SIDE;
    let mut coords = FlightCoordinates::default();
    let mut waves = Array2::<f32>::from_elem((n, N_BINS), 2.0);
    for row in 0..SIDE {
        for col in 0..SIDE {
            let i = row * SIDE + col;
            let x = 15.0 + SPACING * col as f64;
            let y = 15.0 + SPACING * row as f64;
            coords.lon_top.push(x + 1.0);
            coords.lon_bottom.push(x - 1.0);
            coords.lat_top.push(y + 0.5);
            coords.lat_bottom.push(y - 0.5);

            for j in 0..10 {
                waves[[i, j]] = if j % 2 == 0 { 1.0 } else { 3.0 };
            }
            let k = ground_bin(row, col, shift);
            for j in k - 2..=k + 2 {
                waves[[i, j]] = 50.0;
            }
        }
    }
    let arrays = FootprintArrays {
        flight_id: vec![1; n],
        shot_number: (0..n as u64).collect(),
        waves,
        z_top: vec![100.0; n],
        z_bottom: vec![0.0; n],
    };
    MemoryWaveformSource::new(name, coords, arrays).expect("Failed to build synthetic flight")
}

fn config(subdivisions: usize, batch_size: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tiling.subdivisions = subdivisions;
    config.mosaic.batch_size = batch_size;
    config
}

fn pipeline(config: PipelineConfig) -> DemPipeline {
    DemPipeline::new(config, Box::new(IdentityTransform::new(3031))).expect("Failed to create pipeline")
}

fn build_dem(pipeline: &DemPipeline, source: &MemoryWaveformSource) -> Raster {
    let mut store = MemoryTileStore::new();
    let manifest = pipeline
        .process_flight(source, &mut store)
        .expect("Failed to process flight");
    pipeline
        .build_mosaic(&store, &manifest, None)
        .expect("Failed to build mosaic")
}

/// Every valid pixel holds the ground of the footprint on its lower-left corner
fn assert_pixels_match_footprints(dem: &Raster, shift: usize) {
    for ((r, c), &value) in dem.data.indexed_iter() {
        if !dem.is_valid(value) {
            continue;
        }
        let (cx, cy) = dem.transform.pixel_center(r, c);
        let col = ((cx - SPACING / 2.0 - 15.0) / SPACING).round() as usize;
        let row = ((cy - SPACING / 2.0 - 15.0) / SPACING).round() as usize;
        let expected = expected_ground(row, col, shift);
        assert!(
            (value as f64 - expected).abs() < 1e-3,
            "pixel ({}, {}) = {}, expected {}",
            r,
            c,
            value,
            expected
        );
    }
}

#[test]
fn test_flight_to_dem() {
    init_logging();
    let source = synthetic_flight("flightA", 0);
    let pipeline = pipeline(config(4, 10));

    let mut store = MemoryTileStore::new();
    let manifest = pipeline.process_flight(&source, &mut store).expect("Failed to process flight");
    // 4x4 subsets of 2x2 footprints each
    assert_eq!(manifest.len(), 16);
    assert_eq!(store.len(), 16);
    assert_eq!(manifest.handles()[0].id, "flightA_0000");

    let dem = pipeline.build_mosaic(&store, &manifest, None).expect("Failed to build mosaic");
    assert_eq!(dem.epsg, 3031);
    assert_eq!(dem.transform.pixel_width, 30.0);
    assert_eq!(dem.width(), SIDE);
    assert_eq!(dem.height(), SIDE);
    // the northern footprint row of every tile lies on the tile's max-y edge
    // and falls outside every half-open row window
    assert_eq!(dem.valid_count(), SIDE * SIDE / 2);
    assert_pixels_match_footprints(&dem, 0);
}

#[test]
fn test_batch_size_does_not_change_dem() {
    init_logging();
    let source = synthetic_flight("flightA", 0);
    let single = build_dem(&pipeline(config(4, 100)), &source);
    let batched = build_dem(&pipeline(config(4, 3)), &source);
    assert_eq!(single, batched);
}

#[test]
fn test_boundary_filters_and_clips() {
    init_logging();
    let source = synthetic_flight("flightA", 0);
    let pipeline = pipeline(config(4, 4));
    let mut store = MemoryTileStore::new();
    let manifest = pipeline.process_flight(&source, &mut store).expect("Failed to process flight");

    let boundary = MultiPolygon(vec![polygon![
        (x: 0.0, y: 0.0),
        (x: 130.0, y: 0.0),
        (x: 130.0, y: 240.0),
        (x: 0.0, y: 240.0),
    ]]);
    let dem = pipeline
        .build_mosaic(&store, &manifest, Some(&boundary))
        .expect("Failed to build clipped mosaic");

    assert_eq!(dem.width(), 4);
    assert_eq!(dem.valid_count(), 16);
    for ((r, c), &value) in dem.data.indexed_iter() {
        if dem.is_valid(value) {
            assert!(dem.transform.pixel_center(r, c).0 < 130.0);
        }
    }
    assert_pixels_match_footprints(&dem, 0);
}

#[test]
fn test_boundary_outside_flight_is_an_error() {
    let source = synthetic_flight("flightA", 0);
    let pipeline = pipeline(config(4, 4));
    let mut store = MemoryTileStore::new();
    let manifest = pipeline.process_flight(&source, &mut store).expect("Failed to process flight");
    let far = MultiPolygon(vec![polygon![
        (x: 10_000.0, y: 10_000.0),
        (x: 10_100.0, y: 10_000.0),
        (x: 10_100.0, y: 10_100.0),
    ]]);
    assert!(pipeline.build_mosaic(&store, &manifest, Some(&far)).is_err());
}

#[test]
fn test_gap_filling_keeps_measured_pixels() {
    init_logging();
    let source = synthetic_flight("flightA", 0);
    let raw = build_dem(&pipeline(config(4, 10)), &source);

    let mut filled_config = config(4, 10);
    filled_config.gap_fill.enabled = true;
    let filled = build_dem(&pipeline(filled_config), &source);

    assert!(filled.valid_count() > raw.valid_count());
    for (&before, &after) in raw.data.iter().zip(filled.data.iter()) {
        if raw.is_valid(before) {
            assert_eq!(before, after);
        }
    }
}

#[test]
fn test_two_epoch_change() {
    init_logging();
    let pipeline = pipeline(config(4, 10));
    let earlier = build_dem(&pipeline, &synthetic_flight("2009", 0));
    let later = build_dem(&pipeline, &synthetic_flight("2015", 2));

    let report = pipeline.compare_epochs(&later, &earlier).expect("Failed to compare epochs");
    let stats = &report.statistics;
    let drop = 2.0 * 100.0 / 99.0;
    assert_eq!(stats.count, SIDE * SIDE / 2);
    assert!((stats.mean + drop).abs() < 1e-3);
    assert!((stats.median + drop).abs() < 1e-3);
    assert!((stats.volume + drop * 900.0 * stats.count as f64).abs() < 1.0);
    assert!(stats.mass_gt < 0.0);
    assert_eq!(report.histogram.total(), stats.count);
}

/// Flight whose reads fail whenever footprint 0 is requested
struct FailingSource {
    inner: MemoryWaveformSource,
}

impl WaveformSource for FailingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn n_bins(&self) -> LvisResult<usize> {
        self.inner.n_bins()
    }

    fn coordinates(&self) -> LvisResult<FlightCoordinates> {
        self.inner.coordinates()
    }

    fn read_footprints(&self, indices: &[usize]) -> LvisResult<FootprintArrays> {
        if indices.contains(&0) {
            return Err(LvisError::Processing("corrupt waveform block".to_string()));
        }
        self.inner.read_footprints(indices)
    }
}

#[test]
fn test_failed_subsets_skipped_or_fatal() {
    init_logging();
    let source = FailingSource {
        inner: synthetic_flight("flightA", 0),
    };

    let mut tolerant = config(4, 10);
    tolerant.skip_failed = true;
    let mut store = MemoryTileStore::new();
    let manifest = pipeline(tolerant)
        .process_flight(&source, &mut store)
        .expect("Failed subsets should be skipped");
    assert_eq!(manifest.len(), 15);
    assert!(manifest.iter().all(|h| h.id != "flightA_0000"));

    let mut store = MemoryTileStore::new();
    assert!(pipeline(config(4, 10)).process_flight(&source, &mut store).is_err());
}

#[test]
fn test_tiles_survive_store_roundtrip() {
    let source = synthetic_flight("flightA", 0);
    let pipeline = pipeline(config(4, 10));
    let mut store = MemoryTileStore::new();
    let manifest = pipeline.process_flight(&source, &mut store).expect("Failed to process flight");
    for handle in manifest.iter() {
        let tile = store.load(handle).expect("Failed to load tile");
        assert_eq!(tile.grid(), handle.grid);
        assert_eq!(tile.valid_count(), 2);
    }
}
