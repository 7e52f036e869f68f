//! lvisdem: LVIS full-waveform lidar to DEMs and glacier elevation change
//!
//! Waveforms of a flight are denoised and reduced to one ground elevation per
//! footprint, footprints are binned into DEM tiles, tiles are mosaicked and
//! clipped to a study area, and DEMs from two epochs are differenced into
//! elevation, volume and mass change.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, DemImage, GeoTransform, GridSpec, LvisError, LvisResult, Raster,
    NO_DATA, NO_DATA_ELEVATION,
};
pub use config::{PipelineConfig, TilingParams};
pub use io::{CoordinateTransform, IdentityTransform, MemoryWaveformSource, WaveformSource, WaveformStore};
pub use crate::core::{
    ChangeAnalyzer, DemPipeline, GapFiller, GroundEstimator, MosaicEngine, Rasterizer, TileManifest,
};
