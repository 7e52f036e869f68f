use crate::core::mosaic::{TileHandle, TileStore};
use crate::types::{GeoTransform, LvisError, LvisResult, Raster};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Read band 1 of a GeoTIFF.
///
/// The dataset is dropped before returning, so at most one file handle is
/// open per call.
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> LvisResult<Raster> {
    log::debug!("Reading GeoTIFF: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    let epsg = dataset.spatial_ref()?.auth_code()?;

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| LvisError::Processing(format!("Failed to reshape raster data: {}", e)))?;

    let mut raster = Raster::new(data, transform, epsg as u32);
    if let Some(nodata) = nodata {
        raster.nodata = nodata as f32;
    }
    Ok(raster)
}

/// Write a raster as a single-band float32 GeoTIFF with EPSG and no-data tags
pub fn write_geotiff<P: AsRef<Path>>(raster: &Raster, path: P) -> LvisResult<()> {
    log::debug!("Writing GeoTIFF: {}", path.as_ref().display());
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.data.dim();

    let mut dataset = driver.create_with_band_type::<f32, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&raster.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(raster.epsg)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat: Vec<f32> = raster.data.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(raster.nodata as f64))?;
    Ok(())
}

/// Tiles stored as `<id>.tif` in one directory
pub struct GeoTiffTileStore {
    dir: PathBuf,
    // removed with the store when it owns a scratch directory
    _scratch: Option<tempfile::TempDir>,
}

impl GeoTiffTileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> LvisResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            _scratch: None,
        })
    }

    /// Store backed by a temporary directory deleted on drop
    pub fn temporary() -> LvisResult<Self> {
        let scratch = tempfile::TempDir::new()?;
        Ok(Self {
            dir: scratch.path().to_path_buf(),
            _scratch: Some(scratch),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.tif", id))
    }
}

impl TileStore for GeoTiffTileStore {
    fn load(&self, handle: &TileHandle) -> LvisResult<Raster> {
        read_geotiff(self.path_for(&handle.id))
    }

    fn store(&mut self, id: &str, raster: &Raster) -> LvisResult<TileHandle> {
        write_geotiff(raster, self.path_for(id))?;
        Ok(TileHandle::for_raster(id, raster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_DATA;

    #[test]
    fn test_geotiff_roundtrip_keeps_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let data = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, NO_DATA, 4.0, 5.0, 6.0]).unwrap();
        let raster = Raster::new(data, GeoTransform::north_up(-1_500_000.0, 300_000.0, 30.0), 3031);

        write_geotiff(&raster, &path).unwrap();
        let back = read_geotiff(&path).unwrap();
        assert_eq!(back, raster);
    }

    #[test]
    fn test_tile_store_on_disk() {
        let mut store = GeoTiffTileStore::temporary().unwrap();
        let raster = Raster::new(Array2::from_elem((2, 2), 7.0), GeoTransform::north_up(0.0, 60.0, 30.0), 3031);
        let handle = store.store("tile_0", &raster).unwrap();
        assert!(store.path_for("tile_0").exists());
        assert_eq!(store.load(&handle).unwrap(), raster);
    }
}
