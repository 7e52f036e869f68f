use crate::types::{BoundingBox, LvisError, LvisResult};
use ndarray::{Array2, ArrayView1};

/// One lidar return with its vertical profile materialised
#[derive(Debug, Clone)]
pub struct Footprint {
    pub flight_id: u32,
    pub shot_number: u64,
    pub longitude: f64,
    pub latitude: f64,
    /// Range-bin elevations, top to bottom
    pub elevations: Vec<f64>,
    /// Waveform amplitudes, aligned with `elevations`
    pub amplitudes: Vec<f32>,
}

/// Footprints of one flight file selected by a spatial query.
///
/// Immutable once built: downstream stages borrow it and return their own
/// derived structures. Dropping it releases the waveform matrix.
#[derive(Debug, Clone)]
pub struct FlightSubset {
    /// Query box the subset was selected with
    pub bbox: BoundingBox,
    n_bins: usize,
    longitude: Vec<f64>,
    latitude: Vec<f64>,
    flight_id: Vec<u32>,
    shot_number: Vec<u64>,
    waves: Array2<f32>,
    z_top: Vec<f64>,
    z_bottom: Vec<f64>,
}

impl FlightSubset {
    /// Build a subset from already-sliced arrays
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bbox: BoundingBox,
        longitude: Vec<f64>,
        latitude: Vec<f64>,
        flight_id: Vec<u32>,
        shot_number: Vec<u64>,
        waves: Array2<f32>,
        z_top: Vec<f64>,
        z_bottom: Vec<f64>,
    ) -> LvisResult<Self> {
        let (n_waves, n_bins) = waves.dim();
        let lengths = [
            longitude.len(),
            latitude.len(),
            flight_id.len(),
            shot_number.len(),
            z_top.len(),
            z_bottom.len(),
        ];
        if lengths.iter().any(|&len| len != n_waves) {
            return Err(LvisError::InvalidInput(format!(
                "Footprint arrays disagree in length: {:?} vs {} waveforms",
                lengths, n_waves
            )));
        }
        if n_waves > 0 && n_bins < 2 {
            return Err(LvisError::InvalidInput(format!(
                "Waveforms need at least 2 bins, got {}",
                n_bins
            )));
        }

        Ok(Self {
            bbox,
            n_bins,
            longitude,
            latitude,
            flight_id,
            shot_number,
            waves,
            z_top,
            z_bottom,
        })
    }

    /// Subset with zero footprints (nothing in the query box)
    pub fn empty(bbox: BoundingBox, n_bins: usize) -> Self {
        Self {
            bbox,
            n_bins,
            longitude: Vec::new(),
            latitude: Vec::new(),
            flight_id: Vec::new(),
            shot_number: Vec::new(),
            waves: Array2::zeros((0, n_bins)),
            z_top: Vec::new(),
            z_bottom: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.waves.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitude
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitude
    }

    pub fn waveform(&self, index: usize) -> ArrayView1<'_, f32> {
        self.waves.row(index)
    }

    pub fn top_elevation(&self, index: usize) -> f64 {
        self.z_top[index]
    }

    pub fn bottom_elevation(&self, index: usize) -> f64 {
        self.z_bottom[index]
    }

    /// Bin elevations of one footprint, interpolated between top and bottom
    pub fn elevations(&self, index: usize) -> Vec<f64> {
        linspace(self.z_top[index], self.z_bottom[index], self.n_bins)
    }

    /// Vertical size of one bin, taken from the first footprint.
    ///
    /// Every footprint of the subset is assumed to share this sampling.
    pub fn range_resolution(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some((self.z_top[0] - self.z_bottom[0]) / self.n_bins as f64)
    }

    pub fn footprint(&self, index: usize) -> Footprint {
        Footprint {
            flight_id: self.flight_id[index],
            shot_number: self.shot_number[index],
            longitude: self.longitude[index],
            latitude: self.latitude[index],
            elevations: self.elevations(index),
            amplitudes: self.waves.row(index).to_vec(),
        }
    }

    pub fn footprints(&self) -> impl Iterator<Item = Footprint> + '_ {
        (0..self.len()).map(move |i| self.footprint(i))
    }
}

/// `n` evenly spaced samples from `start` to `stop` inclusive
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
            values[n - 1] = stop;
            values
        }
    }
}
