//! Core LVIS processing modules

pub mod waveform;
pub mod noise;
pub mod denoise;
pub mod ground;
pub mod rasterize;
pub mod mosaic;
pub mod gap_fill;
pub mod change;
pub mod pipeline;

// Re-export main types
pub use waveform::{FlightSubset, Footprint};
pub use noise::{NoiseEstimator, NoiseProfile};
pub use denoise::{DenoiseParams, DenoisedWaveforms, Denoiser, PruningMode};
pub use ground::{GroundElevations, GroundEstimator, GroundParams};
pub use rasterize::{PointGrid, RasterParams, Rasterizer};
pub use mosaic::{
    MemoryTileStore, MergeSummary, MosaicEngine, MosaicParams, OverlapPolicy, TileHandle, TileManifest,
    TileStore,
};
pub use gap_fill::{GapFillMethod, GapFillParams, GapFiller};
pub use change::{ChangeAnalyzer, ChangeParams, ChangeReport, ChangeStatistics, EpochSpan, Histogram};
pub use pipeline::{DemPipeline, DemTile, TilePlan};
