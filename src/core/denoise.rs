use crate::core::noise::NoiseProfile;
use crate::core::waveform::FlightSubset;
use crate::types::{LvisError, LvisResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How isolated retained bins are removed before smoothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PruningMode {
    /// Zero every retained bin that is not index-adjacent to both its
    /// retained neighbours; the first and last retained bins are exempt.
    /// `min_width` is not consulted.
    Adjacency,
    /// Zero every run of consecutive retained bins shorter than `min_width`
    RunLength,
}

/// Waveform denoising parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenoiseParams {
    /// Threshold in noise standard deviations above the noise mean
    pub sig_thresh: f64,
    /// Minimum signal width in bins (only used by `PruningMode::RunLength`)
    pub min_width: usize,
    /// Gaussian smoothing width in metres
    pub s_width: f64,
    pub pruning: PruningMode,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        Self {
            sig_thresh: 5.0,
            min_width: 3,
            s_width: 0.5,
            pruning: PruningMode::Adjacency,
        }
    }
}

/// Denoised amplitude profiles, one row per footprint
#[derive(Debug, Clone)]
pub struct DenoisedWaveforms {
    pub amplitudes: Array2<f64>,
    /// Range resolution the smoothing width was converted with
    pub resolution: f64,
}

impl DenoisedWaveforms {
    pub fn len(&self) -> usize {
        self.amplitudes.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Threshold, prune and smooth waveforms
pub struct Denoiser {
    params: DenoiseParams,
}

impl Denoiser {
    /// Create a new denoiser with default parameters
    pub fn new() -> Self {
        Self {
            params: DenoiseParams::default(),
        }
    }

    /// Create a new denoiser with custom parameters
    pub fn with_params(params: DenoiseParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DenoiseParams {
        &self.params
    }

    pub fn denoise(&self, subset: &FlightSubset, noise: &NoiseProfile) -> LvisResult<DenoisedWaveforms> {
        let n_bins = subset.n_bins();
        let resolution = match subset.range_resolution() {
            Some(res) => res,
            None => {
                return Ok(DenoisedWaveforms {
                    amplitudes: Array2::zeros((0, n_bins)),
                    resolution: 0.0,
                })
            }
        };
        if noise.len() != subset.len() {
            return Err(LvisError::Processing(format!(
                "Noise profile covers {} footprints, subset has {}",
                noise.len(),
                subset.len()
            )));
        }

        let sigma = self.params.s_width / resolution;
        log::debug!(
            "Denoising {} waveforms: sig_thresh={}, smoothing sigma={:.3} bins, pruning={:?}",
            subset.len(),
            self.params.sig_thresh,
            sigma,
            self.params.pruning
        );

        let mut amplitudes = Array2::zeros((subset.len(), n_bins));
        for i in 0..subset.len() {
            let wave: Vec<f64> = subset.waveform(i).iter().map(|&v| v as f64).collect();
            let denoised = self.denoise_waveform(
                &wave,
                noise.mean[i],
                noise.threshold(i, self.params.sig_thresh),
                sigma,
            );
            for (dst, src) in amplitudes.row_mut(i).iter_mut().zip(denoised) {
                *dst = src;
            }
        }

        Ok(DenoisedWaveforms {
            amplitudes,
            resolution,
        })
    }

    /// Denoise one waveform.
    ///
    /// The mean is subtracted first and the threshold is then applied to the
    /// mean-subtracted values.
    pub fn denoise_waveform(&self, wave: &[f64], noise_mean: f64, threshold: f64, sigma: f64) -> Vec<f64> {
        let mut values: Vec<f64> = wave
            .iter()
            .map(|&v| {
                let v = v - noise_mean;
                if v < threshold {
                    0.0
                } else {
                    v
                }
            })
            .collect();

        match self.params.pruning {
            PruningMode::Adjacency => prune_adjacency(&mut values),
            PruningMode::RunLength => prune_short_runs(&mut values, self.params.min_width),
        }

        gaussian_filter1d(&values, sigma)
    }
}

impl Default for Denoiser {
    fn default() -> Self {
        Self::new()
    }
}

/// Adjacency pruning over the list of retained (`> 0`) bins.
///
/// All checks use the retained set as it was before any bin is zeroed.
pub fn prune_adjacency(values: &mut [f64]) {
    let retained: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > 0.0)
        .map(|(i, _)| i)
        .collect();
    if retained.len() < 3 {
        return;
    }
    for j in 1..retained.len() - 1 {
        let bin = retained[j];
        if retained[j - 1] + 1 != bin || bin + 1 != retained[j + 1] {
            values[bin] = 0.0;
        }
    }
}

/// Zero runs of consecutive retained bins shorter than `min_width`
pub fn prune_short_runs(values: &mut [f64], min_width: usize) {
    let mut start = 0;
    while start < values.len() {
        if values[start] <= 0.0 {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < values.len() && values[end] > 0.0 {
            end += 1;
        }
        if end - start < min_width {
            values[start..end].iter_mut().for_each(|v| *v = 0.0);
        }
        start = end;
    }
}

/// 1-D Gaussian smoothing with a kernel truncated at 4 sigma and
/// reflected boundaries (`d c b a | a b c d | d c b a`)
pub fn gaussian_filter1d(input: &[f64], sigma: f64) -> Vec<f64> {
    if input.is_empty() || !(sigma > 0.0) || !sigma.is_finite() {
        return input.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as usize;
    let weights = gaussian_kernel(sigma, radius);
    let n = input.len() as isize;

    (0..n)
        .map(|i| {
            weights
                .iter()
                .enumerate()
                .map(|(k, &w)| {
                    let offset = k as isize - radius as isize;
                    w * input[reflect_index(i + offset, n)]
                })
                .sum()
        })
        .collect()
}

fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f64> {
    let r = radius as isize;
    let raw: Vec<f64> = (-r..=r)
        .map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp())
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

fn reflect_index(index: isize, len: isize) -> usize {
    let period = 2 * len;
    let m = index.rem_euclid(period);
    if m < len {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}
