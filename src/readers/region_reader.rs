use crate::config::SpatialSettings;
use crate::error::{PipelineError, Result};
use crate::models::RegionPolygon;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Option<Value>,
}

type Position = Vec<f64>;
type Ring = Vec<Position>;

/// Loads named region boundaries from a GeoJSON FeatureCollection.
/// Polygon and MultiPolygon features are kept in file order.
pub struct RegionReader {
    name_property: String,
    code_property: Option<String>,
}

impl RegionReader {
    pub fn new(name_property: impl Into<String>) -> Self {
        Self {
            name_property: name_property.into(),
            code_property: None,
        }
    }

    pub fn with_code_property(mut self, code_property: impl Into<String>) -> Self {
        self.code_property = Some(code_property.into());
        self
    }

    pub fn from_settings(settings: &SpatialSettings) -> Self {
        Self {
            name_property: settings.name_property.clone(),
            code_property: settings.code_property.clone(),
        }
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<RegionPolygon>> {
        let reader = BufReader::new(File::open(path)?);
        let collection: FeatureCollection = serde_json::from_reader(reader)?;
        let regions = self.convert(collection)?;
        info!("Loaded {} region polygons from {}", regions.len(), path.display());
        Ok(regions)
    }

    pub fn parse_str(&self, geojson: &str) -> Result<Vec<RegionPolygon>> {
        self.convert(serde_json::from_str(geojson)?)
    }

    fn convert(&self, collection: FeatureCollection) -> Result<Vec<RegionPolygon>> {
        if collection.kind != "FeatureCollection" {
            return Err(PipelineError::InvalidGeometry(format!(
                "Expected a FeatureCollection, found '{}'",
                collection.kind
            )));
        }

        let mut regions = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let properties = feature.properties.unwrap_or_default();
            let name = property(&properties, &self.name_property).ok_or_else(|| {
                PipelineError::InvalidGeometry(format!(
                    "Feature {} has no '{}' property",
                    i, self.name_property
                ))
            })?;

            let Some(geometry) = feature.geometry.filter(|g| !g.is_null()) else {
                warn!("Region '{}' has no geometry; skipped", name);
                continue;
            };

            let Some(geometry) = parse_geometry(&geometry)
                .map_err(|e| PipelineError::InvalidGeometry(format!("Region '{}': {}", name, e)))?
            else {
                warn!("Region '{}' is not a polygon; skipped", name);
                continue;
            };

            let mut region = RegionPolygon::new(name, geometry);
            if let Some(code) = self
                .code_property
                .as_deref()
                .and_then(|key| property(&properties, key))
            {
                region = region.with_code(code);
            }
            regions.push(region);
        }

        Ok(regions)
    }
}

fn property(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `Ok(None)` for geometry types other than Polygon/MultiPolygon.
fn parse_geometry(geometry: &Value) -> std::result::Result<Option<MultiPolygon<f64>>, String> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry without type")?;
    let coordinates = geometry
        .get("coordinates")
        .cloned()
        .ok_or("geometry without coordinates")?;

    match kind {
        "Polygon" => {
            let rings: Vec<Ring> = serde_json::from_value(coordinates).map_err(|e| e.to_string())?;
            Ok(Some(MultiPolygon::new(vec![polygon(rings)?])))
        }
        "MultiPolygon" => {
            let polygons: Vec<Vec<Ring>> =
                serde_json::from_value(coordinates).map_err(|e| e.to_string())?;
            let polygons = polygons
                .into_iter()
                .map(polygon)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Some(MultiPolygon::new(polygons)))
        }
        _ => Ok(None),
    }
}

fn polygon(rings: Vec<Ring>) -> std::result::Result<Polygon<f64>, String> {
    let mut rings = rings.into_iter().map(line_string);
    let exterior = rings.next().ok_or("polygon without rings")??;
    let interiors = rings.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn line_string(ring: Ring) -> std::result::Result<LineString<f64>, String> {
    let coords = ring
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
            _ => Err(format!("invalid position {:?}", p)),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if coords.len() < 3 {
        return Err(format!("ring with {} positions", coords.len()));
    }
    Ok(LineString::new(coords))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"name": "Bogotá D.C.", "code": 11},
                "geometry": {"type": "Polygon", "coordinates": [[[-74.3, 4.4], [-73.9, 4.4], [-73.9, 4.9], [-74.3, 4.9], [-74.3, 4.4]]]}
            },
            {
                "type": "Feature",
                "properties": {"name": "Cundinamarca", "code": "25"},
                "geometry": {"type": "MultiPolygon", "coordinates": [[[[-75.0, 3.7, 0.0], [-73.0, 3.7, 0.0], [-73.0, 5.9, 0.0], [-75.0, 5.9, 0.0], [-75.0, 3.7, 0.0]]]]}
            },
            {
                "type": "Feature",
                "properties": {"name": "Marker"},
                "geometry": {"type": "Point", "coordinates": [-74.0, 4.6]}
            }
        ]
    }"#;

    #[test]
    fn test_parse_feature_collection() {
        let regions = RegionReader::new("name")
            .with_code_property("code")
            .parse_str(GEOJSON)
            .unwrap();

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].name, "Bogotá D.C.");
        assert_eq!(regions[0].code.as_deref(), Some("11"));
        assert_eq!(regions[1].name, "Cundinamarca");
        assert_eq!(regions[1].geometry.0.len(), 1);
    }

    #[test]
    fn test_missing_name_property_is_an_error() {
        let result = RegionReader::new("NOMBRE_DPT").parse_str(GEOJSON);
        assert!(matches!(result, Err(PipelineError::InvalidGeometry(_))));
    }

    #[test]
    fn test_degenerate_ring_is_rejected() {
        let geojson = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"name": "Line"},
             "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]}}
        ]}"#;
        assert!(RegionReader::new("name").parse_str(geojson).is_err());
    }

    #[test]
    fn test_not_a_feature_collection() {
        let geojson = r#"{"type": "Feature", "features": []}"#;
        assert!(RegionReader::new("name").parse_str(geojson).is_err());
    }
}
