use crate::models::{Observation, Station};
use crate::utils::constants::UNKNOWN_REGION;
use geo::MultiPolygon;
use serde::{Serialize, Serializer};
use std::fmt;

/// An administrative boundary (department) made of one or more closed rings.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPolygon {
    pub name: String,
    pub code: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl RegionPolygon {
    pub fn new(name: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            name: name.into(),
            code: None,
            geometry,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Region attached to every attributed observation. Never absent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionName {
    Named(String),
    Unknown,
}

impl RegionName {
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_REGION) {
            RegionName::Unknown
        } else {
            RegionName::Named(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RegionName::Named(name) => name,
            RegionName::Unknown => UNKNOWN_REGION,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, RegionName::Named(_))
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegionName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributedObservation {
    pub observation: Observation,
    pub region: RegionName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum GapReason {
    /// Observation refers to a station missing from the catalogue.
    UnknownStation,
    /// Station has no valid coordinate.
    Unlocated,
    /// Coordinate falls inside no region polygon.
    OutsideRegions,
}

/// Soft condition: a station could not be placed in any region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpatialAttributionGap {
    pub station_id: String,
    pub reason: GapReason,
    pub observations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributionReport {
    pub stations_total: usize,
    pub stations_located: usize,
    pub observations_attributed: usize,
    pub observations_unknown: usize,
    pub gaps: Vec<SpatialAttributionGap>,
}

impl AttributionReport {
    pub fn summary(&self) -> String {
        format!(
            "=== Spatial Attribution Report ===\n\
            Stations: {} ({} located)\n\
            Observations attributed to a region: {}\n\
            Observations in region '{}': {}\n\
            Attribution gaps: {}",
            self.stations_total,
            self.stations_located,
            self.observations_attributed,
            UNKNOWN_REGION,
            self.observations_unknown,
            self.gaps.len()
        )
    }
}

/// Output of spatial attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedDataset {
    pub observations: Vec<AttributedObservation>,
    pub stations: Vec<Station>,
    pub report: AttributionReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_name_display() {
        assert_eq!(RegionName::Unknown.to_string(), "unknown");
        assert_eq!(
            RegionName::Named("Bogotá D.C.".to_string()).to_string(),
            "Bogotá D.C."
        );
        assert_eq!(RegionName::parse(" unknown "), RegionName::Unknown);
        assert_eq!(RegionName::parse(""), RegionName::Unknown);
        assert!(RegionName::parse("Cundinamarca").is_known());
    }
}
