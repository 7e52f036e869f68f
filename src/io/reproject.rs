use crate::types::{LvisError, LvisResult};

/// Point reprojection between two EPSG coordinate systems.
///
/// Coordinates are always x = easting/longitude, y = northing/latitude.
pub trait CoordinateTransform: Send + Sync {
    fn source_epsg(&self) -> u32;

    fn target_epsg(&self) -> u32;

    /// Reproject in place
    fn transform(&self, x: &mut [f64], y: &mut [f64]) -> LvisResult<()>;
}

/// Leaves coordinates untouched; for data already in the output CRS
#[derive(Debug, Clone, Copy)]
pub struct IdentityTransform {
    epsg: u32,
}

impl IdentityTransform {
    pub fn new(epsg: u32) -> Self {
        Self { epsg }
    }
}

impl CoordinateTransform for IdentityTransform {
    fn source_epsg(&self) -> u32 {
        self.epsg
    }

    fn target_epsg(&self) -> u32 {
        self.epsg
    }

    fn transform(&self, x: &mut [f64], y: &mut [f64]) -> LvisResult<()> {
        check_lengths(x, y)
    }
}

/// Reprojected copies of `x` and `y`
pub fn reproject_points<T: CoordinateTransform + ?Sized>(
    transform: &T,
    x: &[f64],
    y: &[f64],
) -> LvisResult<(Vec<f64>, Vec<f64>)> {
    let mut x = x.to_vec();
    let mut y = y.to_vec();
    if transform.source_epsg() != transform.target_epsg() {
        log::debug!(
            "Reprojecting {} points EPSG:{} -> EPSG:{}",
            x.len(),
            transform.source_epsg(),
            transform.target_epsg()
        );
    }
    transform.transform(&mut x, &mut y)?;
    Ok((x, y))
}

fn check_lengths(x: &[f64], y: &[f64]) -> LvisResult<()> {
    if x.len() != y.len() {
        return Err(LvisError::InvalidInput(format!(
            "Coordinate arrays differ in length: {} / {}",
            x.len(),
            y.len()
        )));
    }
    Ok(())
}

/// OSR-backed transform with traditional GIS (x, y) axis order
#[cfg(feature = "gdal")]
#[derive(Debug, Clone, Copy)]
pub struct GdalTransform {
    source: u32,
    target: u32,
}

#[cfg(feature = "gdal")]
impl GdalTransform {
    pub fn new(source: u32, target: u32) -> LvisResult<Self> {
        // fail early on unknown codes
        Self::spatial_ref(source)?;
        Self::spatial_ref(target)?;
        Ok(Self { source, target })
    }

    fn spatial_ref(epsg: u32) -> LvisResult<gdal::spatial_ref::SpatialRef> {
        let srs = gdal::spatial_ref::SpatialRef::from_epsg(epsg)?;
        srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        Ok(srs)
    }
}

#[cfg(feature = "gdal")]
impl CoordinateTransform for GdalTransform {
    fn source_epsg(&self) -> u32 {
        self.source
    }

    fn target_epsg(&self) -> u32 {
        self.target
    }

    fn transform(&self, x: &mut [f64], y: &mut [f64]) -> LvisResult<()> {
        check_lengths(x, y)?;
        if x.is_empty() || self.source == self.target {
            return Ok(());
        }
        // OSR handles are not thread-safe, so each call builds its own
        let src = Self::spatial_ref(self.source)?;
        let dst = Self::spatial_ref(self.target)?;
        let ct = gdal::spatial_ref::CoordTransform::new(&src, &dst)?;
        let mut z = vec![0.0; x.len()];
        ct.transform_coords(x, y, &mut z)?;
        Ok(())
    }
}
