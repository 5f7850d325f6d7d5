use crate::models::{RegionName, Station};
use crate::processors::spatial_attributor::{stations_within, RegionIndex};
use serde::{Deserialize, Serialize};

/// Circle around a point, in kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusFilter {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

/// Station selection for `list_stations`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationFilter {
    pub department: Option<String>,
    pub municipality: Option<String>,
    /// Region name resolved from the polygon set ("unknown" selects unplaced stations).
    pub region: Option<String>,
    pub near: Option<RadiusFilter>,
    pub limit: Option<usize>,
}

impl StationFilter {
    pub fn for_department(department: impl Into<String>) -> Self {
        Self {
            department: Some(department.into()),
            ..Self::default()
        }
    }

    pub fn within(mut self, latitude: f64, longitude: f64, radius_km: f64) -> Self {
        self.near = Some(RadiusFilter {
            latitude,
            longitude,
            radius_km,
        });
        self
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fill in regions, then keep matching stations. Results are ordered by
    /// id, or by distance when a radius is set.
    pub fn apply(&self, stations: Vec<Station>, regions: &RegionIndex) -> Vec<Station> {
        let region_filter = self.region.as_deref().map(RegionName::parse);

        let matching: Vec<Station> = stations
            .into_iter()
            .map(|mut station| {
                if let Some((lat, lon)) = station.location() {
                    if let RegionName::Named(name) = regions.region_name(lat, lon) {
                        station.region = Some(name);
                    }
                }
                station
            })
            .filter(|s| {
                self.department
                    .as_deref()
                    .map_or(true, |d| s.is_in_department(d))
            })
            .filter(|s| {
                self.municipality.as_deref().map_or(true, |m| {
                    s.municipality
                        .as_deref()
                        .is_some_and(|sm| sm.trim().eq_ignore_ascii_case(m.trim()))
                })
            })
            .filter(|s| {
                region_filter.as_ref().map_or(true, |wanted| {
                    let actual = s
                        .region
                        .as_deref()
                        .map(RegionName::parse)
                        .unwrap_or(RegionName::Unknown);
                    match (wanted, &actual) {
                        (RegionName::Named(w), RegionName::Named(a)) => w.eq_ignore_ascii_case(a),
                        _ => *wanted == actual,
                    }
                })
            })
            .collect();

        let mut selected = match &self.near {
            Some(near) => stations_within(&matching, near.latitude, near.longitude, near.radius_km)
                .into_iter()
                .map(|(station, _)| station.clone())
                .collect(),
            None => {
                let mut sorted = matching;
                sorted.sort_by(|a, b| a.id.cmp(&b.id));
                sorted
            }
        };

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegionPolygon;
    use geo::{polygon, MultiPolygon};

    fn regions() -> RegionIndex {
        let bogota = polygon![
            (x: -74.25, y: 4.45),
            (x: -73.95, y: 4.45),
            (x: -73.95, y: 4.85),
            (x: -74.25, y: 4.85),
            (x: -74.25, y: 4.45),
        ];
        RegionIndex::new(vec![RegionPolygon::new("Bogotá D.C.", MultiPolygon(vec![bogota]))])
    }

    fn stations() -> Vec<Station> {
        vec![
            Station::new("C", "Girardot")
                .with_coordinates(4.30, -74.80)
                .with_department("CUNDINAMARCA")
                .with_municipality("GIRARDOT"),
            Station::new("A", "El Dorado")
                .with_coordinates(4.70, -74.15)
                .with_department("BOGOTA D.C.")
                .with_municipality("BOGOTA"),
            Station::new("B", "Sin ubicación").with_department("CUNDINAMARCA"),
        ]
    }

    #[test]
    fn test_department_and_municipality() {
        let found = StationFilter::for_department("cundinamarca").apply(stations(), &regions());
        let ids: Vec<&str> = found.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);

        let filter = StationFilter {
            municipality: Some("Girardot".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.apply(stations(), &regions()).len(), 1);
    }

    #[test]
    fn test_region_filter_uses_polygons() {
        let found = StationFilter::default()
            .in_region("Bogotá D.C.")
            .apply(stations(), &regions());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].region.as_deref(), Some("Bogotá D.C."));

        let unknown = StationFilter::default()
            .in_region("unknown")
            .apply(stations(), &regions());
        assert_eq!(unknown.len(), 2);
    }

    #[test]
    fn test_radius_orders_by_distance() {
        let found = StationFilter::default()
            .within(4.60, -74.08, 100.0)
            .apply(stations(), &regions());
        let ids: Vec<&str> = found.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);

        let limited = StationFilter::default()
            .within(4.60, -74.08, 100.0)
            .with_limit(1)
            .apply(stations(), &regions());
        assert_eq!(limited.len(), 1);
    }
}
