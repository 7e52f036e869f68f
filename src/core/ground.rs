use crate::core::denoise::{DenoiseParams, DenoisedWaveforms, Denoiser, PruningMode};
use crate::core::noise::NoiseEstimator;
use crate::core::waveform::FlightSubset;
use crate::types::{LvisError, LvisResult, NO_DATA_ELEVATION};
use serde::{Deserialize, Serialize};

/// Ground-finding parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundParams {
    /// Noise threshold in standard deviations
    pub sig_thresh: f64,
    /// Length of the leading noise window in metres
    pub stats_len: f64,
    /// Minimum signal width in bins
    pub min_width: usize,
    /// Smoothing width in metres
    pub s_width: f64,
    pub pruning: PruningMode,
}

impl Default for GroundParams {
    fn default() -> Self {
        let denoise = DenoiseParams::default();
        Self {
            sig_thresh: denoise.sig_thresh,
            stats_len: 10.0,
            min_width: denoise.min_width,
            s_width: denoise.s_width,
            pruning: denoise.pruning,
        }
    }
}

impl GroundParams {
    pub fn denoise_params(&self) -> DenoiseParams {
        DenoiseParams {
            sig_thresh: self.sig_thresh,
            min_width: self.min_width,
            s_width: self.s_width,
            pruning: self.pruning,
        }
    }
}

/// Ground elevation per footprint, `NO_DATA_ELEVATION` where no signal survived
#[derive(Debug, Clone, Default)]
pub struct GroundElevations {
    pub values: Vec<f64>,
}

impl GroundElevations {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|&&z| z != NO_DATA_ELEVATION).count()
    }
}

/// Centre-of-gravity ground finder
pub struct GroundEstimator {
    params: GroundParams,
}

impl GroundEstimator {
    /// Create a new ground estimator with default parameters
    pub fn new() -> Self {
        Self {
            params: GroundParams::default(),
        }
    }

    /// Create a new ground estimator with custom parameters
    pub fn with_params(params: GroundParams) -> Self {
        Self { params }
    }

    /// Noise statistics, denoising and centroid for every footprint of a subset
    pub fn estimate(&self, subset: &FlightSubset) -> LvisResult<GroundElevations> {
        if subset.is_empty() {
            return Ok(GroundElevations::default());
        }
        let noise = NoiseEstimator::new(self.params.stats_len).estimate(subset)?;
        let denoised = Denoiser::with_params(self.params.denoise_params()).denoise(subset, &noise)?;
        let ground = Self::centre_of_gravity(subset, &denoised)?;
        log::info!(
            "Ground found for {} of {} footprints",
            ground.valid_count(),
            ground.len()
        );
        Ok(ground)
    }

    /// Amplitude-weighted mean bin elevation of each denoised waveform
    pub fn centre_of_gravity(
        subset: &FlightSubset,
        denoised: &DenoisedWaveforms,
    ) -> LvisResult<GroundElevations> {
        if denoised.len() != subset.len() || denoised.amplitudes.ncols() != subset.n_bins() {
            return Err(LvisError::Processing(format!(
                "Denoised waveforms {:?} do not match subset ({}, {})",
                denoised.amplitudes.dim(),
                subset.len(),
                subset.n_bins()
            )));
        }

        let values = (0..subset.len())
            .map(|i| {
                let weights = denoised.amplitudes.row(i);
                let total: f64 = weights.sum();
                if total > 0.0 {
                    let z = subset.elevations(i);
                    z.iter().zip(weights.iter()).map(|(&z, &w)| z * w).sum::<f64>() / total
                } else {
                    NO_DATA_ELEVATION
                }
            })
            .collect();

        Ok(GroundElevations { values })
    }
}

impl Default for GroundEstimator {
    fn default() -> Self {
        Self::new()
    }
}
