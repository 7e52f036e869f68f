use crate::types::{LvisError, LvisResult, Raster, NO_DATA};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Acquisition dates of the two epochs being compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEpochSpan")]
pub struct EpochSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Unchecked dates as they appear in a configuration file
#[derive(Deserialize)]
struct RawEpochSpan {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawEpochSpan> for EpochSpan {
    type Error = LvisError;

    fn try_from(raw: RawEpochSpan) -> LvisResult<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl EpochSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> LvisResult<Self> {
        if end <= start {
            return Err(LvisError::InvalidInput(format!(
                "Epoch end {} must follow start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Elapsed time in years of 365.25 days
    pub fn years(&self) -> f64 {
        (self.end - self.start).num_days() as f64 / 365.25
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeParams {
    /// kg/m^3
    pub ice_density: f64,
    /// kg/m^3
    pub water_density: f64,
    /// Histogram spans `[-histogram_range, histogram_range]` metres
    pub histogram_range: f64,
    pub histogram_bins: usize,
    pub epochs: Option<EpochSpan>,
}

impl Default for ChangeParams {
    fn default() -> Self {
        Self {
            ice_density: 917.0,
            water_density: 1000.0,
            histogram_range: 75.0,
            histogram_bins: 30,
            epochs: None,
        }
    }
}

/// Equal-width histogram; the last bin is closed on its upper edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn from_values(values: impl IntoIterator<Item = f64>, lo: f64, hi: f64, bins: usize) -> LvisResult<Self> {
        if bins == 0 || !(hi > lo) {
            return Err(LvisError::InvalidInput(format!(
                "Histogram needs bins > 0 and hi > lo, got {} bins over [{}, {}]",
                bins, lo, hi
            )));
        }
        let width = (hi - lo) / bins as f64;
        let edges = (0..=bins).map(|k| lo + k as f64 * width).collect();
        let mut counts = vec![0; bins];
        for v in values {
            if !(v >= lo && v <= hi) {
                continue;
            }
            let k = (((v - lo) / width).floor() as usize).min(bins - 1);
            counts[k] += 1;
        }
        Ok(Self { edges, counts })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Aggregate elevation and mass change over valid pixels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeStatistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    /// m^2 per pixel
    pub pixel_area: f64,
    /// m^3
    pub volume: f64,
    /// m^3 of water
    pub water_equivalent_volume: f64,
    pub mass_kg: f64,
    pub mass_gt: f64,
    /// m/yr, when the epoch dates are known
    pub annual_elevation_rate: Option<f64>,
    /// Gt/yr, when the epoch dates are known
    pub annual_mass_rate_gt: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ChangeReport {
    pub difference: Raster,
    pub statistics: ChangeStatistics,
    pub histogram: Histogram,
}

/// Differences co-registered DEMs and summarises the change
pub struct ChangeAnalyzer {
    params: ChangeParams,
}

impl ChangeAnalyzer {
    /// Create a new change analyzer with default densities and histogram
    pub fn new() -> Self {
        Self {
            params: ChangeParams::default(),
        }
    }

    /// Create a new change analyzer with custom parameters
    pub fn with_params(params: ChangeParams) -> Self {
        Self { params }
    }

    /// `later - earlier` per pixel, no-data where either side is no-data
    pub fn difference(&self, later: &Raster, earlier: &Raster) -> LvisResult<Raster> {
        if !later.same_grid(earlier) || later.epsg != earlier.epsg {
            return Err(LvisError::GridMismatch {
                expected: format!("{:?} EPSG:{}", earlier.grid(), earlier.epsg),
                found: format!("{:?} EPSG:{}", later.grid(), later.epsg),
            });
        }

        let data = Array2::from_shape_fn(later.data.dim(), |idx| {
            let (a, b) = (later.data[idx], earlier.data[idx]);
            if !later.is_valid(a) || !earlier.is_valid(b) {
                return NO_DATA;
            }
            let d = a - b;
            if d.is_finite() {
                d
            } else {
                NO_DATA
            }
        });
        Ok(Raster::new(data, later.transform, later.epsg))
    }

    pub fn statistics(&self, difference: &Raster) -> ChangeStatistics {
        let mut values: Vec<f64> = valid_values(difference).collect();
        let count = values.len();
        let pixel_area = difference.transform.pixel_area();

        let (mean, std, median, min, max) = if count == 0 {
            (f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN)
        } else {
            let n = count as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            values.sort_by(|a, b| a.total_cmp(b));
            let mid = count / 2;
            let median = if count % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            };
            (mean, var.sqrt(), median, values[0], values[count - 1])
        };

        let volume = values.iter().sum::<f64>() * pixel_area;
        let water_equivalent_volume = volume * self.params.ice_density / self.params.water_density;
        let mass_kg = volume * self.params.ice_density;
        let mass_gt = mass_kg / 1e12;

        let years = self.params.epochs.map(|e| e.years());
        ChangeStatistics {
            count,
            mean,
            median,
            min,
            max,
            std,
            pixel_area,
            volume,
            water_equivalent_volume,
            mass_kg,
            mass_gt,
            annual_elevation_rate: years.map(|y| mean / y),
            annual_mass_rate_gt: years.map(|y| mass_gt / y),
        }
    }

    pub fn histogram(&self, difference: &Raster) -> LvisResult<Histogram> {
        let range = self.params.histogram_range;
        Histogram::from_values(valid_values(difference), -range, range, self.params.histogram_bins)
    }

    /// Difference, statistics and histogram in one call
    pub fn analyze(&self, later: &Raster, earlier: &Raster) -> LvisResult<ChangeReport> {
        let difference = self.difference(later, earlier)?;
        let statistics = self.statistics(&difference);
        let histogram = self.histogram(&difference)?;

        log::info!(
            "Elevation change over {} pixels: mean {:.3} m, median {:.3} m",
            statistics.count,
            statistics.mean,
            statistics.median
        );
        log::info!(
            "Volume change {:.3e} m^3, mass change {:.6} Gt",
            statistics.volume,
            statistics.mass_gt
        );
        if let Some(rate) = statistics.annual_mass_rate_gt {
            log::info!("Mass change rate {:.6} Gt/yr", rate);
        }
        let outside = statistics.count - histogram.total();
        if outside > 0 {
            log::debug!(
                "{} differences fall outside the ±{} m histogram range",
                outside,
                self.params.histogram_range
            );
        }

        Ok(ChangeReport {
            difference,
            statistics,
            histogram,
        })
    }
}

impl Default for ChangeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_values(raster: &Raster) -> impl Iterator<Item = f64> + '_ {
    raster
        .data
        .iter()
        .filter(move |&&v| raster.is_valid(v))
        .map(|&v| v as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn raster(data: Array2<f32>) -> Raster {
        Raster::new(data, GeoTransform::north_up(0.0, 0.0, 30.0), 3031)
    }

    #[test]
    fn test_two_by_two_change() {
        let earlier = raster(array![[10.0, 20.0], [30.0, NO_DATA]]);
        let later = raster(array![[12.0, 19.0], [33.0, NO_DATA]]);
        let analyzer = ChangeAnalyzer::new();

        let diff = analyzer.difference(&later, &earlier).unwrap();
        assert_eq!(diff.data, array![[2.0, -1.0], [3.0, NO_DATA]]);

        let stats = analyzer.statistics(&diff);
        assert_eq!(stats.count, 3);
        assert_abs_diff_eq!(stats.mean, 4.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.median, 2.0);
        assert_abs_diff_eq!(stats.min, -1.0);
        assert_abs_diff_eq!(stats.max, 3.0);
        assert_abs_diff_eq!(stats.pixel_area, 900.0);
        assert_abs_diff_eq!(stats.volume, 3600.0);
        assert_abs_diff_eq!(stats.water_equivalent_volume, 3301.2, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.mass_kg, 3_301_200.0, epsilon = 1e-6);
        assert!(stats.annual_elevation_rate.is_none());
    }

    #[test]
    fn test_self_difference_is_zero() {
        let dem = raster(array![[5.0, NO_DATA], [7.5, 9.0]]);
        let diff = ChangeAnalyzer::new().difference(&dem, &dem).unwrap();
        assert_eq!(diff.data, array![[0.0, NO_DATA], [0.0, 0.0]]);
    }

    #[test]
    fn test_grid_mismatch_is_an_error() {
        let a = raster(Array2::zeros((2, 2)));
        let b = raster(Array2::zeros((2, 3)));
        assert!(matches!(
            ChangeAnalyzer::new().difference(&a, &b),
            Err(LvisError::GridMismatch { .. })
        ));

        let mut shifted = raster(Array2::zeros((2, 2)));
        shifted.transform.top_left_x += 30.0;
        assert!(ChangeAnalyzer::new().difference(&a, &shifted).is_err());
    }

    #[test]
    fn test_annual_rate_from_epochs() {
        let epochs = EpochSpan::new(
            NaiveDate::from_ymd_opt(2009, 10, 29).unwrap(),
            NaiveDate::from_ymd_opt(2015, 10, 29).unwrap(),
        )
        .unwrap();
        let analyzer = ChangeAnalyzer::with_params(ChangeParams {
            epochs: Some(epochs),
            ..ChangeParams::default()
        });
        let diff = raster(array![[-6.0, -6.0]]);
        let stats = analyzer.statistics(&diff);
        // 2191 days
        assert_abs_diff_eq!(stats.annual_elevation_rate.unwrap(), -6.0 / (2191.0 / 365.25), epsilon = 1e-9);
        assert!(stats.annual_mass_rate_gt.unwrap() < 0.0);
    }

    #[test]
    fn test_histogram_bins() {
        let diff = raster(array![[2.0, -1.0, 3.0, 75.0, 80.0, NO_DATA]]);
        let hist = ChangeAnalyzer::new().histogram(&diff).unwrap();
        assert_eq!(hist.edges.len(), 31);
        assert_abs_diff_eq!(hist.edges[0], -75.0);
        assert_eq!(hist.counts[14], 1);
        assert_eq!(hist.counts[15], 2);
        assert_eq!(hist.counts[29], 1);
        assert_eq!(hist.total(), 4);
    }

    #[test]
    fn test_statistics_of_empty_difference() {
        let diff = raster(Array2::from_elem((2, 2), NO_DATA));
        let stats = ChangeAnalyzer::new().statistics(&diff);
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_nan());
        assert_eq!(stats.volume, 0.0);
    }

    #[test]
    fn test_epoch_order_checked() {
        let d = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        assert!(EpochSpan::new(d, d).is_err());
    }
}
