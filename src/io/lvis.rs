//! Access to LVIS flight files and spatial subsetting.
//!
//! The container format itself (HDF5 with `RXWAVE`, `LON0`/`LAT0`,
//! `LON{n-1}`/`LAT{n-1}`, `Z0`, `Z{n-1}`, `LFID` and `SHOTNUMBER` arrays) is
//! read by an implementation of [`WaveformSource`]. Only the light per-footprint
//! coordinate arrays are read for the whole flight; waveform samples are read
//! for the selected footprints only.

use crate::core::waveform::FlightSubset;
use crate::types::{BoundingBox, LvisError, LvisResult};
use ndarray::{Array2, Axis};

/// Coordinates of the top (bin 0) and bottom (bin n-1) of every waveform
#[derive(Debug, Clone, Default)]
pub struct FlightCoordinates {
    pub lon_top: Vec<f64>,
    pub lat_top: Vec<f64>,
    pub lon_bottom: Vec<f64>,
    pub lat_bottom: Vec<f64>,
}

impl FlightCoordinates {
    pub fn len(&self) -> usize {
        self.lon_top.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lon_top.is_empty()
    }

    /// Single representative x per footprint: mean of top and bottom
    pub fn mean_x(&self, index: usize) -> f64 {
        (self.lon_top[index] + self.lon_bottom[index]) / 2.0
    }

    pub fn mean_y(&self, index: usize) -> f64 {
        (self.lat_top[index] + self.lat_bottom[index]) / 2.0
    }

    /// Bounds of the mean footprint coordinates over the whole flight
    pub fn bounds(&self) -> Option<BoundingBox> {
        let x: Vec<f64> = (0..self.len()).map(|i| self.mean_x(i)).collect();
        let y: Vec<f64> = (0..self.len()).map(|i| self.mean_y(i)).collect();
        BoundingBox::from_points(&x, &y)
    }

    /// Indices of footprints whose mean coordinate lies in the half-open box
    pub fn query(&self, bbox: &BoundingBox) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| bbox.contains_half_open(self.mean_x(i), self.mean_y(i)))
            .collect()
    }

    fn validate(&self) -> LvisResult<()> {
        let n = self.lon_top.len();
        if self.lat_top.len() != n || self.lon_bottom.len() != n || self.lat_bottom.len() != n {
            return Err(LvisError::InvalidInput(
                "Top/bottom coordinate arrays differ in length".to_string(),
            ));
        }
        Ok(())
    }
}

/// Heavy per-footprint arrays for a selection of footprints
#[derive(Debug, Clone)]
pub struct FootprintArrays {
    pub flight_id: Vec<u32>,
    pub shot_number: Vec<u64>,
    pub waves: Array2<f32>,
    pub z_top: Vec<f64>,
    pub z_bottom: Vec<f64>,
}

/// Read-only view of one LVIS flight file
pub trait WaveformSource {
    /// Label used in logs and tile identifiers
    fn name(&self) -> &str;

    /// Bins per waveform, constant across the file
    fn n_bins(&self) -> LvisResult<usize>;

    /// Top and bottom coordinates of every footprint in the file
    fn coordinates(&self) -> LvisResult<FlightCoordinates>;

    /// Materialise the heavy arrays of the given footprints, in index order
    fn read_footprints(&self, indices: &[usize]) -> LvisResult<FootprintArrays>;
}

/// Flight held entirely in memory (tests, synthetic data, embedding callers)
#[derive(Debug, Clone)]
pub struct MemoryWaveformSource {
    name: String,
    coordinates: FlightCoordinates,
    arrays: FootprintArrays,
}

impl MemoryWaveformSource {
    pub fn new(
        name: impl Into<String>,
        coordinates: FlightCoordinates,
        arrays: FootprintArrays,
    ) -> LvisResult<Self> {
        coordinates.validate()?;
        let n = arrays.waves.nrows();
        if coordinates.len() != n
            || arrays.flight_id.len() != n
            || arrays.shot_number.len() != n
            || arrays.z_top.len() != n
            || arrays.z_bottom.len() != n
        {
            return Err(LvisError::InvalidInput(format!(
                "Flight arrays disagree with {} waveforms",
                n
            )));
        }
        Ok(Self {
            name: name.into(),
            coordinates,
            arrays,
        })
    }
}

impl WaveformSource for MemoryWaveformSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_bins(&self) -> LvisResult<usize> {
        Ok(self.arrays.waves.ncols())
    }

    fn coordinates(&self) -> LvisResult<FlightCoordinates> {
        Ok(self.coordinates.clone())
    }

    fn read_footprints(&self, indices: &[usize]) -> LvisResult<FootprintArrays> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.arrays.waves.nrows()) {
            return Err(LvisError::InvalidInput(format!(
                "Footprint index {} out of range",
                bad
            )));
        }
        Ok(FootprintArrays {
            flight_id: indices.iter().map(|&i| self.arrays.flight_id[i]).collect(),
            shot_number: indices.iter().map(|&i| self.arrays.shot_number[i]).collect(),
            waves: self.arrays.waves.select(Axis(0), indices),
            z_top: indices.iter().map(|&i| self.arrays.z_top[i]).collect(),
            z_bottom: indices.iter().map(|&i| self.arrays.z_bottom[i]).collect(),
        })
    }
}

/// Region queries over one flight, holding only its coordinate arrays
pub struct WaveformStore<'a, S: WaveformSource + ?Sized> {
    source: &'a S,
    coordinates: FlightCoordinates,
    n_bins: usize,
}

impl<'a, S: WaveformSource + ?Sized> WaveformStore<'a, S> {
    pub fn open(source: &'a S) -> LvisResult<Self> {
        let coordinates = source.coordinates()?;
        coordinates.validate()?;
        let n_bins = source.n_bins()?;
        log::info!(
            "Opened flight {}: {} footprints, {} bins",
            source.name(),
            coordinates.len(),
            n_bins
        );
        Ok(Self {
            source,
            coordinates,
            n_bins,
        })
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn footprint_count(&self) -> usize {
        self.coordinates.len()
    }

    /// Bounds of the flight without touching any waveform
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.coordinates.bounds()
    }

    /// Select footprints whose mean coordinate falls in `bbox` (half-open).
    ///
    /// An empty selection returns an empty subset, not an error.
    pub fn subset(&self, bbox: &BoundingBox) -> LvisResult<FlightSubset> {
        let indices = self.coordinates.query(bbox);
        if indices.is_empty() {
            log::debug!("No footprints of {} inside {:?}", self.name(), bbox);
            return Ok(FlightSubset::empty(*bbox, self.n_bins));
        }
        log::debug!("Subset of {} footprints inside {:?}", indices.len(), bbox);

        let arrays = self.source.read_footprints(&indices)?;
        if arrays.waves.ncols() != self.n_bins {
            return Err(LvisError::InvalidInput(format!(
                "Waveform length {} differs from flight bin count {}",
                arrays.waves.ncols(),
                self.n_bins
            )));
        }

        FlightSubset::new(
            *bbox,
            indices.iter().map(|&i| self.coordinates.mean_x(i)).collect(),
            indices.iter().map(|&i| self.coordinates.mean_y(i)).collect(),
            arrays.flight_id,
            arrays.shot_number,
            arrays.waves,
            arrays.z_top,
            arrays.z_bottom,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemoryWaveformSource {
        let coordinates = FlightCoordinates {
            lon_top: vec![-100.0, -99.5, -99.0, -98.0],
            lat_top: vec![-75.0, -74.5, -74.0, -73.0],
            lon_bottom: vec![-100.2, -99.7, -99.0, -98.0],
            lat_bottom: vec![-75.2, -74.7, -74.0, -73.0],
        };
        let arrays = FootprintArrays {
            flight_id: vec![1, 1, 1, 1],
            shot_number: vec![10, 11, 12, 13],
            waves: Array2::from_shape_fn((4, 8), |(i, j)| (i * 10 + j) as f32),
            z_top: vec![100.0; 4],
            z_bottom: vec![92.0; 4],
        };
        MemoryWaveformSource::new("flight", coordinates, arrays).unwrap()
    }

    #[test]
    fn test_region_query_uses_mean_coordinate() {
        let src = source();
        let store = WaveformStore::open(&src).unwrap();
        // footprint 0 mean is (-100.1, -75.1)
        let bbox = BoundingBox::new(-100.15, -75.15, -100.0, -75.0);
        let subset = store.subset(&bbox).unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.footprint(0).shot_number, 10);
        assert!((subset.longitudes()[0] + 100.1).abs() < 1e-12);
    }

    #[test]
    fn test_region_query_half_open() {
        let src = source();
        let store = WaveformStore::open(&src).unwrap();
        // footprint 2 sits exactly on min corner, footprint 3 exactly on max corner
        let bbox = BoundingBox::new(-99.0, -74.0, -98.0, -73.0);
        let subset = store.subset(&bbox).unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.footprint(0).shot_number, 12);
        for i in 0..subset.len() {
            assert!(bbox.contains_half_open(subset.longitudes()[i], subset.latitudes()[i]));
        }
    }

    #[test]
    fn test_empty_subset_is_not_an_error() {
        let src = source();
        let store = WaveformStore::open(&src).unwrap();
        let subset = store.subset(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)).unwrap();
        assert!(subset.is_empty());
        assert_eq!(subset.n_bins(), 8);
    }

    #[test]
    fn test_flight_bounds() {
        let src = source();
        let store = WaveformStore::open(&src).unwrap();
        let b = store.bounds().unwrap();
        assert!((b.min_x + 100.1).abs() < 1e-12);
        assert_eq!(b.max_x, -98.0);
        assert_eq!(b.max_y, -73.0);
    }

    #[test]
    fn test_only_selected_waveforms_materialised() {
        let src = source();
        let arrays = src.read_footprints(&[3, 1]).unwrap();
        assert_eq!(arrays.waves.dim(), (2, 8));
        assert_eq!(arrays.waves[[0, 0]], 30.0);
        assert_eq!(arrays.shot_number, vec![13, 11]);
    }
}
