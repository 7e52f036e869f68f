use crate::core::change::ChangeParams;
use crate::core::gap_fill::GapFillParams;
use crate::core::ground::GroundParams;
use crate::core::mosaic::MosaicParams;
use crate::core::rasterize::RasterParams;
use crate::types::LvisResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// How a flight is cut into spatial subsets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingParams {
    /// Subsets per flight width; the subset edge is `width / subdivisions`
    pub subdivisions: usize,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self { subdivisions: 16 }
    }
}

/// Complete processing configuration; every section falls back to defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ground: GroundParams,
    pub raster: RasterParams,
    pub tiling: TilingParams,
    pub mosaic: MosaicParams,
    pub gap_fill: GapFillParams,
    pub change: ChangeParams,
    /// Log and skip subsets that fail instead of aborting the flight
    pub skip_failed: bool,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> LvisResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> LvisResult<Self> {
        log::info!("Loading configuration from {}", path.as_ref().display());
        let reader = BufReader::new(File::open(path)?);
        let config: PipelineConfig = serde_json::from_reader(reader)?;
        log::debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn to_json_string(&self) -> LvisResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
