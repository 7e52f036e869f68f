//! Study-area boundaries read from GeoJSON.

use crate::io::reproject::CoordinateTransform;
use crate::types::{BoundingBox, LvisError, LvisResult};
use geo::{BoundingRect, Coord, Geometry, GeometryCollection, LineString, MultiPolygon, Polygon};
use geojson::{quick_collection, GeoJson};
use std::{fs::File, path::Path};

/// Every polygon in a GeoJSON file, as one multipolygon
pub fn load_boundary<P: AsRef<Path>>(path: P) -> LvisResult<MultiPolygon<f64>> {
    log::info!("Loading boundary from {}", path.as_ref().display());
    let file = File::open(path)?;
    let geojson = GeoJson::from_reader(file)?;
    boundary_from_geojson(&geojson)
}

pub fn boundary_from_geojson_str(text: &str) -> LvisResult<MultiPolygon<f64>> {
    let geojson = text.parse::<GeoJson>()?;
    boundary_from_geojson(&geojson)
}

fn boundary_from_geojson(geojson: &GeoJson) -> LvisResult<MultiPolygon<f64>> {
    let collection: GeometryCollection<f64> = quick_collection(geojson)?;
    let mut polygons = Vec::new();
    collect_polygons(collection, &mut polygons);
    if polygons.is_empty() {
        return Err(LvisError::InvalidInput(
            "Boundary contains no polygons".to_string(),
        ));
    }
    log::debug!("Boundary holds {} polygons", polygons.len());
    Ok(MultiPolygon(polygons))
}

fn collect_polygons(collection: GeometryCollection<f64>, out: &mut Vec<Polygon<f64>>) {
    for geometry in collection {
        match geometry {
            Geometry::Polygon(p) => out.push(p),
            Geometry::MultiPolygon(mp) => out.extend(mp.0),
            Geometry::Rect(r) => out.push(r.to_polygon()),
            Geometry::Triangle(t) => out.push(t.to_polygon()),
            Geometry::GeometryCollection(inner) => collect_polygons(inner, out),
            other => log::debug!("Ignoring non-areal boundary geometry {:?}", other),
        }
    }
}

/// Boundary in the transform's target CRS
pub fn reproject_boundary<T: CoordinateTransform + ?Sized>(
    boundary: &MultiPolygon<f64>,
    transform: &T,
) -> LvisResult<MultiPolygon<f64>> {
    let polygons = boundary
        .iter()
        .map(|polygon| {
            let exterior = reproject_ring(polygon.exterior(), transform)?;
            let interiors = polygon
                .interiors()
                .iter()
                .map(|ring| reproject_ring(ring, transform))
                .collect::<LvisResult<Vec<_>>>()?;
            Ok(Polygon::new(exterior, interiors))
        })
        .collect::<LvisResult<Vec<_>>>()?;
    Ok(MultiPolygon(polygons))
}

fn reproject_ring<T: CoordinateTransform + ?Sized>(
    ring: &LineString<f64>,
    transform: &T,
) -> LvisResult<LineString<f64>> {
    let mut x: Vec<f64> = ring.coords().map(|c| c.x).collect();
    let mut y: Vec<f64> = ring.coords().map(|c| c.y).collect();
    transform.transform(&mut x, &mut y)?;
    Ok(LineString::new(
        x.into_iter().zip(y).map(|(x, y)| Coord { x, y }).collect(),
    ))
}

pub fn boundary_bounds(boundary: &MultiPolygon<f64>) -> Option<BoundingBox> {
    boundary
        .bounding_rect()
        .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
}
