use crate::models::{
    AttributedDataset, AttributedObservation, AttributionReport, Dataset, GapReason,
    RegionName, RegionPolygon, SpatialAttributionGap, Station,
};
use crate::processors::parallel_processor::ShardedExecutor;
use crate::utils::coordinates::haversine_distance;
use geo::{BoundingRect, Intersects, Point};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

type RegionEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Read-only region set with a bounding-box index. Shared between workers
/// behind an `Arc`.
#[derive(Debug)]
pub struct RegionIndex {
    regions: Vec<RegionPolygon>,
    tree: RTree<RegionEnvelope>,
}

impl RegionIndex {
    /// Regions keep their load order; it decides ties on shared boundaries.
    pub fn new(regions: Vec<RegionPolygon>) -> Self {
        let envelopes = regions
            .iter()
            .enumerate()
            .filter_map(|(i, region)| {
                let rect = region.geometry.bounding_rect()?;
                let (min, max) = (rect.min(), rect.max());
                Some(GeomWithData::new(
                    Rectangle::from_corners([min.x, min.y], [max.x, max.y]),
                    i,
                ))
            })
            .collect();

        Self {
            regions,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[RegionPolygon] {
        &self.regions
    }

    /// First region, in load order, whose polygon contains the point.
    /// Points on an edge count as inside.
    pub fn locate(&self, latitude: f64, longitude: f64) -> Option<&RegionPolygon> {
        let point = Point::new(longitude, latitude);
        let mut candidates: Vec<usize> = self
            .tree
            .locate_all_at_point(&[longitude, latitude])
            .map(|envelope| envelope.data)
            .collect();
        candidates.sort_unstable();

        candidates
            .into_iter()
            .map(|i| &self.regions[i])
            .find(|region| region.geometry.intersects(&point))
    }

    pub fn region_name(&self, latitude: f64, longitude: f64) -> RegionName {
        self.locate(latitude, longitude)
            .map(|region| RegionName::Named(region.name.clone()))
            .unwrap_or(RegionName::Unknown)
    }
}

/// Outcome of resolving one catalogue station.
fn resolve_station(station: &Station, regions: &RegionIndex) -> (RegionName, Option<GapReason>) {
    let Some((lat, lon)) = station.location() else {
        return (RegionName::Unknown, Some(GapReason::Unlocated));
    };

    match regions.region_name(lat, lon) {
        RegionName::Unknown => (RegionName::Unknown, Some(GapReason::OutsideRegions)),
        named => (named, None),
    }
}

/// Attaches a region to every observation through its station. Spatial
/// gaps end up in the report and never fail the run.
pub struct SpatialAttributor {
    regions: Arc<RegionIndex>,
    executor: Option<ShardedExecutor>,
}

impl SpatialAttributor {
    pub fn new(regions: Arc<RegionIndex>) -> Self {
        Self {
            regions,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: ShardedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn attribute(&self, dataset: &Dataset, stations: &[Station]) -> AttributedDataset {
        let regions = self.regions.as_ref();
        let resolved: Vec<(RegionName, Option<GapReason>)> = match &self.executor {
            Some(executor) => executor.map(stations, |station| resolve_station(station, regions)),
            None => stations
                .iter()
                .map(|station| resolve_station(station, regions))
                .collect(),
        };

        let mut lookup: HashMap<&str, (RegionName, Option<GapReason>)> =
            HashMap::with_capacity(stations.len());
        let mut attributed_stations = Vec::with_capacity(stations.len());
        for (station, (region, gap)) in stations.iter().zip(resolved) {
            let mut attributed = station.clone();
            if let RegionName::Named(name) = &region {
                attributed.region = Some(name.clone());
            }
            lookup.insert(station.id.as_str(), (region, gap));
            attributed_stations.push(attributed);
        }

        let mut gap_counts: BTreeMap<(String, GapReason), usize> = BTreeMap::new();
        let mut report = AttributionReport {
            stations_total: stations.len(),
            stations_located: stations.iter().filter(|s| s.is_located()).count(),
            ..Default::default()
        };

        let observations: Vec<AttributedObservation> = dataset
            .observations
            .iter()
            .map(|obs| {
                let (region, gap) = match lookup.get(obs.station_id.as_str()) {
                    Some((region, gap)) => (region.clone(), *gap),
                    None => (RegionName::Unknown, Some(GapReason::UnknownStation)),
                };
                if let Some(reason) = gap {
                    *gap_counts
                        .entry((obs.station_id.clone(), reason))
                        .or_default() += 1;
                }
                if region.is_known() {
                    report.observations_attributed += 1;
                } else {
                    report.observations_unknown += 1;
                }
                AttributedObservation {
                    observation: obs.clone(),
                    region,
                }
            })
            .collect();

        report.gaps = gap_counts
            .into_iter()
            .map(|((station_id, reason), observations)| SpatialAttributionGap {
                station_id,
                reason,
                observations,
            })
            .collect();

        if !report.gaps.is_empty() {
            warn!(
                "{} stations could not be placed in a region ({} observations marked unknown)",
                report.gaps.len(),
                report.observations_unknown
            );
            for gap in &report.gaps {
                debug!("Station {}: {:?}", gap.station_id, gap.reason);
            }
        }
        info!(
            "Attributed {} observations across {} regions",
            report.observations_attributed,
            self.regions.len()
        );

        AttributedDataset {
            observations,
            stations: attributed_stations,
            report,
        }
    }
}

/// Sequential attribution with a shared region set.
pub fn attribute(
    dataset: &Dataset,
    stations: &[Station],
    regions: Arc<RegionIndex>,
) -> AttributedDataset {
    SpatialAttributor::new(regions).attribute(dataset, stations)
}

/// Closest located station to a point and its distance in kilometres.
pub fn nearest_station(stations: &[Station], latitude: f64, longitude: f64) -> Option<(&Station, f64)> {
    stations
        .iter()
        .filter_map(|station| {
            let (lat, lon) = station.location()?;
            Some((station, haversine_distance(latitude, longitude, lat, lon)))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)))
}

/// Located stations within `radius_km` of a point, nearest first.
pub fn stations_within(
    stations: &[Station],
    latitude: f64,
    longitude: f64,
    radius_km: f64,
) -> Vec<(&Station, f64)> {
    let mut found: Vec<(&Station, f64)> = stations
        .iter()
        .filter_map(|station| {
            let (lat, lon) = station.location()?;
            let distance = haversine_distance(latitude, longitude, lat, lon);
            (distance <= radius_km).then_some((station, distance))
        })
        .collect();
    found.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Observation, Variable};
    use chrono::{DateTime, TimeZone, Utc};
    use geo::{polygon, MultiPolygon};

    fn square(name: &str, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> RegionPolygon {
        let poly = polygon![
            (x: min_lon, y: min_lat),
            (x: max_lon, y: min_lat),
            (x: max_lon, y: max_lat),
            (x: min_lon, y: max_lat),
            (x: min_lon, y: min_lat),
        ];
        RegionPolygon::new(name, MultiPolygon(vec![poly]))
    }

    fn regions() -> Arc<RegionIndex> {
        Arc::new(RegionIndex::new(vec![
            square("Bogotá D.C.", -74.25, 4.45, -73.95, 4.85),
            square("Cundinamarca", -74.9, 3.7, -73.0, 5.9),
        ]))
    }

    fn obs(station: &str) -> Observation {
        Observation::new(
            station,
            Some(DateTime::parse_from_rfc3339("2024-01-01T00:00:00-05:00").unwrap()),
            Variable::Precipitation,
            Some("1.0".to_string()),
            "b1",
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_locate_first_region_in_load_order() {
        let index = regions();
        assert_eq!(
            index.region_name(4.60, -74.08),
            RegionName::Named("Bogotá D.C.".to_string())
        );
        assert_eq!(
            index.region_name(5.5, -74.5),
            RegionName::Named("Cundinamarca".to_string())
        );
        assert_eq!(index.region_name(0.0, 0.0), RegionName::Unknown);
    }

    #[test]
    fn test_boundary_points_are_inside() {
        let index = RegionIndex::new(vec![
            square("West", 0.0, 0.0, 1.0, 1.0),
            square("East", 1.0, 0.0, 2.0, 1.0),
        ]);
        // Shared edge goes to the region loaded first.
        assert_eq!(index.locate(0.5, 1.0).map(|r| r.name.as_str()), Some("West"));
        assert_eq!(index.locate(0.0, 2.0).map(|r| r.name.as_str()), Some("East"));
    }

    #[test]
    fn test_attribution_is_total() {
        let stations = vec![
            Station::new("S1", "Bogotá").with_coordinates(4.60, -74.08),
            Station::new("S2", "Null Island").with_coordinates(0.0, 0.0),
            Station::new("S3", "No coordinates"),
        ];
        let dataset = Dataset::new(
            vec![obs("S1"), obs("S2"), obs("S3"), obs("S4")],
            stations.clone(),
        );

        let attributed = attribute(&dataset, &stations, regions());

        let names: Vec<String> = attributed
            .observations
            .iter()
            .map(|o| o.region.to_string())
            .collect();
        assert_eq!(names, vec!["Bogotá D.C.", "unknown", "unknown", "unknown"]);
        assert_eq!(attributed.report.observations_attributed, 1);
        assert_eq!(attributed.report.observations_unknown, 3);
        assert_eq!(attributed.report.stations_located, 2);

        let reasons: Vec<(&str, GapReason)> = attributed
            .report
            .gaps
            .iter()
            .map(|g| (g.station_id.as_str(), g.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("S2", GapReason::OutsideRegions),
                ("S3", GapReason::Unlocated),
                ("S4", GapReason::UnknownStation),
            ]
        );
        assert_eq!(attributed.stations[0].region.as_deref(), Some("Bogotá D.C."));
        assert_eq!(attributed.stations[1].region, None);
    }

    #[test]
    fn test_parallel_attribution_matches_sequential() {
        let stations: Vec<Station> = (0..50)
            .map(|i| {
                Station::new(format!("S{}", i), "s")
                    .with_coordinates(3.5 + i as f64 * 0.05, -74.5 + i as f64 * 0.02)
            })
            .collect();
        let observations = stations.iter().map(|s| obs(&s.id)).collect();
        let dataset = Dataset::new(observations, stations.clone());

        let sequential = SpatialAttributor::new(regions()).attribute(&dataset, &stations);
        let parallel = SpatialAttributor::new(regions())
            .with_executor(ShardedExecutor::new(4).unwrap().with_chunk_size(4))
            .attribute(&dataset, &stations);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_nearest_station() {
        let stations = vec![
            Station::new("A", "El Dorado").with_coordinates(4.7016, -74.1469),
            Station::new("B", "Girardot").with_coordinates(4.3, -74.8),
            Station::new("C", "Unlocated"),
        ];
        let (nearest, distance) = nearest_station(&stations, 4.60, -74.08).unwrap();
        assert_eq!(nearest.id, "A");
        assert!(distance < 15.0);

        let within = stations_within(&stations, 4.60, -74.08, 50.0);
        assert_eq!(within.len(), 1);
        assert!(nearest_station(&[], 0.0, 0.0).is_none());
    }
}
