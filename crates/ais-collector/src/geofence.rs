//! Two-stage geographic filtering
//!
//! Stage one is the coarse [`BoundingBox`] sent with the feed subscription and
//! enforced remotely. Stage two is [`GeoFilter`]: point-in-polygon containment
//! against the authoritative region boundary, loaded once from GeoJSON.

use std::path::{Path, PathBuf};

use geo::{BoundingRect, Contains, Geometry, Point, Polygon, Rect};
use geojson::GeoJson;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("Failed to read region boundary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid GeoJSON in region boundary: {0}")]
    Parse(#[from] geojson::Error),

    #[error("Region boundary contains no polygons")]
    NoPolygons,
}

/// Coarse rectangle in degrees, serialized as `[[south, west], [north, east]]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Default subscription area covering the North Sea
    pub const NORTH_SEA: Self = Self {
        south: 50.0,
        west: -5.0,
        north: 61.5,
        east: 13.0,
    };

    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.south)
            && (-90.0..=90.0).contains(&self.north)
            && (-180.0..=180.0).contains(&self.west)
            && (-180.0..=180.0).contains(&self.east)
            && self.south < self.north
            && self.west < self.east
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [[self.south, self.west], [self.north, self.east]].serialize(serializer)
    }
}

/// Authoritative region boundary: one or more polygons
#[derive(Debug, Clone)]
pub struct GeoFilter {
    polygons: Vec<(Polygon<f64>, Rect<f64>)>,
}

impl GeoFilter {
    /// Load the boundary from a GeoJSON file (Geometry, Feature or FeatureCollection)
    pub fn load(path: &Path) -> Result<Self, GeofenceError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GeofenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filter = Self::from_geojson_str(&raw)?;
        debug!(
            path = %path.display(),
            polygons = filter.polygon_count(),
            "Region boundary loaded"
        );
        Ok(filter)
    }

    pub fn from_geojson_str(raw: &str) -> Result<Self, GeofenceError> {
        let geometries = match raw.parse::<GeoJson>()? {
            GeoJson::Geometry(geometry) => vec![geometry],
            GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
            GeoJson::FeatureCollection(collection) => collection
                .features
                .into_iter()
                .filter_map(|feature| feature.geometry)
                .collect(),
        };

        let mut polygons = Vec::new();
        for geometry in geometries {
            match Geometry::<f64>::try_from(geometry)? {
                Geometry::Polygon(polygon) => polygons.push(polygon),
                Geometry::MultiPolygon(multi) => polygons.extend(multi.0),
                other => warn!(
                    kind = geometry_kind(&other),
                    "Ignoring non-polygon geometry in region boundary"
                ),
            }
        }

        Self::from_polygons(polygons)
    }

    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Result<Self, GeofenceError> {
        let polygons: Vec<_> = polygons
            .into_iter()
            .filter_map(|polygon| polygon.bounding_rect().map(|rect| (polygon, rect)))
            .collect();

        if polygons.is_empty() {
            return Err(GeofenceError::NoPolygons);
        }

        Ok(Self { polygons })
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// True iff both coordinates are present and the point lies inside at least one polygon
    pub fn admits(&self, latitude: Option<f64>, longitude: Option<f64>) -> bool {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => self.contains(lat, lon),
            _ => false,
        }
    }

    /// Point-in-polygon test against every polygon of the boundary
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if !latitude.is_finite() || !longitude.is_finite() {
            return false;
        }

        // GIS order is (x = longitude, y = latitude)
        let point = Point::new(longitude, latitude);
        self.polygons
            .iter()
            .any(|(polygon, rect)| rect.contains(&point) && polygon.contains(&point))
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Two disjoint squares: one in the southern North Sea, one off Norway
    const TWO_SQUARES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"name": "south"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[2.0, 52.0], [5.0, 52.0], [5.0, 55.0], [2.0, 55.0], [2.0, 52.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"name": "north"},
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[3.0, 58.0], [6.0, 58.0], [6.0, 60.0], [3.0, 60.0], [3.0, 58.0]]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"name": "marker"},
                "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
            }
        ]
    }"#;

    #[test]
    fn test_point_in_either_polygon_passes() {
        let filter = GeoFilter::from_geojson_str(TWO_SQUARES).unwrap();
        assert_eq!(filter.polygon_count(), 2);
        assert!(filter.admits(Some(53.5), Some(3.5)));
        assert!(filter.admits(Some(59.0), Some(4.0)));
    }

    #[test]
    fn test_inside_bbox_but_outside_polygons_is_filtered() {
        let filter = GeoFilter::from_geojson_str(TWO_SQUARES).unwrap();
        let (lat, lon) = (56.5, 10.0);

        let bbox = BoundingBox::NORTH_SEA;
        assert!(lat > bbox.south && lat < bbox.north && lon > bbox.west && lon < bbox.east);
        assert!(!filter.admits(Some(lat), Some(lon)));
    }

    #[test]
    fn test_absent_or_invalid_coordinates_fail() {
        let filter = GeoFilter::from_geojson_str(TWO_SQUARES).unwrap();
        assert!(!filter.admits(None, Some(3.5)));
        assert!(!filter.admits(Some(53.5), None));
        assert!(!filter.admits(None, None));
        assert!(!filter.admits(Some(f64::NAN), Some(3.5)));
    }

    #[test]
    fn test_boundary_without_polygons_is_rejected() {
        let raw = r#"{"type": "Point", "coordinates": [4.0, 53.0]}"#;
        assert!(matches!(
            GeoFilter::from_geojson_str(raw),
            Err(GeofenceError::NoPolygons)
        ));
        assert!(matches!(
            GeoFilter::from_geojson_str("not json"),
            Err(GeofenceError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_SQUARES.as_bytes()).unwrap();

        let filter = GeoFilter::load(file.path()).unwrap();
        assert_eq!(filter.polygon_count(), 2);

        let missing = GeoFilter::load(Path::new("/nonexistent/region.geojson"));
        assert!(matches!(missing, Err(GeofenceError::Io { .. })));
    }

    #[test]
    fn test_bounding_box_serializes_as_corner_pairs() {
        let json = serde_json::to_string(&BoundingBox::NORTH_SEA).unwrap();
        assert_eq!(json, "[[50.0,-5.0],[61.5,13.0]]");
        assert!(BoundingBox::NORTH_SEA.is_valid());
        assert!(!BoundingBox::new(61.5, -5.0, 50.0, 13.0).is_valid());
    }
}
