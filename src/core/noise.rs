use crate::core::waveform::FlightSubset;
use crate::types::{LvisError, LvisResult};
use num_traits::Float;

/// Background noise statistics per footprint
#[derive(Debug, Clone, Default)]
pub struct NoiseProfile {
    pub mean: Vec<f64>,
    pub stdev: Vec<f64>,
    /// Leading bins the statistics were computed over
    pub noise_bins: usize,
}

impl NoiseProfile {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Detection threshold `mean + sig_thresh * stdev` for one footprint
    pub fn threshold(&self, index: usize, sig_thresh: f64) -> f64 {
        self.mean[index] + sig_thresh * self.stdev[index]
    }
}

/// Estimates noise from the first `stats_len` metres of every waveform
#[derive(Debug, Clone)]
pub struct NoiseEstimator {
    stats_len: f64,
}

impl NoiseEstimator {
    /// Create a new noise estimator
    pub fn new(stats_len: f64) -> Self {
        Self { stats_len }
    }

    pub fn estimate(&self, subset: &FlightSubset) -> LvisResult<NoiseProfile> {
        let resolution = match subset.range_resolution() {
            Some(res) => res,
            None => return Ok(NoiseProfile::default()),
        };
        let noise_bins = noise_bin_count(self.stats_len, resolution, subset.n_bins())?;
        log::debug!(
            "Noise window: {} bins ({} m at {:.4} m/bin)",
            noise_bins,
            self.stats_len,
            resolution
        );

        let mut mean = Vec::with_capacity(subset.len());
        let mut stdev = Vec::with_capacity(subset.len());
        for i in 0..subset.len() {
            let wave = subset.waveform(i);
            let (m, s) = mean_and_stdev(wave.iter().take(noise_bins).map(|&v| v as f64));
            mean.push(m);
            stdev.push(s);
        }

        Ok(NoiseProfile {
            mean,
            stdev,
            noise_bins,
        })
    }
}

/// `floor(stats_len / resolution)`, capped at the waveform length
pub fn noise_bin_count(stats_len: f64, resolution: f64, n_bins: usize) -> LvisResult<usize> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(LvisError::InvalidInput(format!(
            "Range resolution must be positive, got {}",
            resolution
        )));
    }
    let bins = (stats_len / resolution).floor();
    if !(bins >= 1.0) {
        return Err(LvisError::InvalidInput(format!(
            "Noise window of {} m is shorter than one {:.4} m bin",
            stats_len, resolution
        )));
    }
    let bins = bins as usize;
    if bins > n_bins {
        log::warn!(
            "Noise window of {} bins exceeds waveform length {}, using the whole waveform",
            bins,
            n_bins
        );
        return Ok(n_bins);
    }
    Ok(bins)
}

/// Mean and population standard deviation
pub fn mean_and_stdev<T, I>(values: I) -> (T, T)
where
    T: Float,
    I: IntoIterator<Item = T>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let mut n = T::zero();
    let mut sum = T::zero();
    for v in iter.clone() {
        sum = sum + v;
        n = n + T::one();
    }
    if n == T::zero() {
        return (T::nan(), T::nan());
    }
    let mean = sum / n;
    let var = iter.fold(T::zero(), |acc, v| acc + (v - mean) * (v - mean)) / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    #[test]
    fn test_mean_and_stdev_population() {
        let (m, s) = mean_and_stdev(vec![2.0f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_abs_diff_eq!(m, 5.0);
        assert_abs_diff_eq!(s, 2.0);
    }

    #[test]
    fn test_noise_bin_count() {
        assert_eq!(noise_bin_count(10.0, 0.3, 1000).unwrap(), 33);
        assert_eq!(noise_bin_count(10.0, 0.3, 20).unwrap(), 20);
        assert!(noise_bin_count(0.1, 0.3, 20).is_err());
        assert!(noise_bin_count(10.0, 0.0, 20).is_err());
    }

    #[test]
    fn test_estimate_uses_leading_window_only() {
        // 100 bins over 100 m -> 1 m bins, 10 m window -> 10 noise bins
        let mut waves = Array2::<f32>::zeros((1, 100));
        for j in 0..10 {
            waves[[0, j]] = if j % 2 == 0 { 1.0 } else { 3.0 };
        }
        waves[[0, 50]] = 500.0;
        let subset = FlightSubset::new(
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            vec![0.0],
            vec![0.0],
            vec![1],
            vec![1],
            waves,
            vec![200.0],
            vec![100.0],
        )
        .unwrap();

        let profile = NoiseEstimator::new(10.0).estimate(&subset).unwrap();
        assert_eq!(profile.noise_bins, 10);
        assert_abs_diff_eq!(profile.mean[0], 2.0);
        assert_abs_diff_eq!(profile.stdev[0], 1.0);
        assert_abs_diff_eq!(profile.threshold(0, 5.0), 7.0);
    }

    #[test]
    fn test_empty_subset_gives_empty_profile() {
        let subset = FlightSubset::empty(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 10);
        let profile = NoiseEstimator::new(10.0).estimate(&subset).unwrap();
        assert!(profile.is_empty());
    }
}
