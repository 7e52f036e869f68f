//! I/O modules for LVIS flights, coordinate transforms, boundaries and GeoTIFFs

pub mod lvis;
pub mod reproject;
pub mod boundary;
#[cfg(feature = "gdal")]
pub mod geotiff;

pub use lvis::{FlightCoordinates, FootprintArrays, MemoryWaveformSource, WaveformSource, WaveformStore};
pub use reproject::{reproject_points, CoordinateTransform, IdentityTransform};
#[cfg(feature = "gdal")]
pub use reproject::GdalTransform;
pub use boundary::{boundary_from_geojson_str, load_boundary, reproject_boundary};
#[cfg(feature = "gdal")]
pub use geotiff::{read_geotiff, write_geotiff, GeoTiffTileStore};
