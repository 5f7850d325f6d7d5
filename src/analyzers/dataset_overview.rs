use crate::error::{PipelineError, Result};
use crate::models::{AttributedObservation, Station, Variable};
use chrono::{DateTime, FixedOffset};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Extreme {
    pub value: f64,
    pub station_id: String,
    pub timestamp: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableExtremes {
    pub count: usize,
    pub lowest: Extreme,
    pub highest: Extreme,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataQuality {
    pub total_records: usize,
    pub clean_records: usize,
    pub outlier_records: usize,
    pub out_of_range_records: usize,
    pub coercion_failures: usize,
    pub null_values: usize,
}

impl DataQuality {
    fn percentage(&self, count: usize) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            (count as f64 / self.total_records as f64) * 100.0
        }
    }

    pub fn clean_percentage(&self) -> f64 {
        self.percentage(self.clean_records)
    }

    pub fn outlier_percentage(&self) -> f64 {
        self.percentage(self.outlier_records)
    }

    pub fn null_percentage(&self) -> f64 {
        self.percentage(self.null_values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeographicBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Descriptive statistics of an attributed dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetOverview {
    pub total_records: usize,
    pub unique_stations: usize,
    pub regions: BTreeSet<String>,
    pub date_range: Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)>,
    pub extremes: BTreeMap<Variable, VariableExtremes>,
    pub data_quality: DataQuality,
    pub geographic_bounds: Option<GeographicBounds>,
}

impl DatasetOverview {
    pub fn compute(observations: &[AttributedObservation], stations: &[Station]) -> Result<Self> {
        if observations.is_empty() {
            return Err(PipelineError::MissingData("No records to analyze".to_string()));
        }

        let mut station_ids = BTreeSet::new();
        let mut regions = BTreeSet::new();
        let mut date_range: Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> = None;
        let mut extremes: BTreeMap<Variable, VariableExtremes> = BTreeMap::new();
        let mut quality = DataQuality {
            total_records: observations.len(),
            ..Default::default()
        };

        for attributed in observations {
            let obs = &attributed.observation;
            station_ids.insert(obs.station_id.as_str());
            regions.insert(attributed.region.to_string());

            if obs.flags.is_clean() && obs.value.is_some() {
                quality.clean_records += 1;
            }
            if obs.flags.is_outlier {
                quality.outlier_records += 1;
            }
            if obs.flags.out_of_range {
                quality.out_of_range_records += 1;
            }
            if obs.flags.coercion_failed {
                quality.coercion_failures += 1;
            }
            if obs.value.is_none() {
                quality.null_values += 1;
            }

            let Some(ts) = obs.timestamp else { continue };
            date_range = Some(match date_range {
                Some((start, end)) => (start.min(ts), end.max(ts)),
                None => (ts, ts),
            });

            let Some(value) = obs.value.filter(|v| v.is_finite()) else {
                continue;
            };
            let extreme = || Extreme {
                value,
                station_id: obs.station_id.clone(),
                timestamp: ts,
            };
            extremes
                .entry(obs.variable)
                .and_modify(|e| {
                    e.count += 1;
                    if value < e.lowest.value {
                        e.lowest = extreme();
                    }
                    if value > e.highest.value {
                        e.highest = extreme();
                    }
                })
                .or_insert_with(|| VariableExtremes {
                    count: 1,
                    lowest: extreme(),
                    highest: extreme(),
                });
        }

        Ok(Self {
            total_records: observations.len(),
            unique_stations: station_ids.len(),
            regions,
            date_range,
            extremes,
            data_quality: quality,
            geographic_bounds: bounds(stations),
        })
    }

    pub fn summary(&self) -> String {
        let dates = match &self.date_range {
            Some((start, end)) => format!(
                "{} to {} ({} days)",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d"),
                end.signed_duration_since(*start).num_days()
            ),
            None => "No timestamps".to_string(),
        };
        let coverage = match &self.geographic_bounds {
            Some(b) => format!(
                "{:.2}..{:.2} lat, {:.2}..{:.2} lon",
                b.min_lat, b.max_lat, b.min_lon, b.max_lon
            ),
            None => "No located stations".to_string(),
        };

        format!(
            "Stations: {}\n\
            Regions: {}\n\
            Date Range: {}\n\
            Records: {} total\n\
            Data Quality: {:.1}% clean, {:.1}% outliers, {:.1}% null\n\
            Coverage: {}",
            self.unique_stations,
            self.regions.iter().cloned().collect::<Vec<_>>().join(", "),
            dates,
            self.total_records,
            self.data_quality.clean_percentage(),
            self.data_quality.outlier_percentage(),
            self.data_quality.null_percentage(),
            coverage
        )
    }

    pub fn detailed_summary(&self) -> String {
        let mut out = self.summary();
        out.push_str("\n\nExtremes:");
        for (variable, e) in &self.extremes {
            let unit = variable.default_unit();
            out.push_str(&format!(
                "\n- {} ({} values): lowest {:.1}{} at {} ({}), highest {:.1}{} at {} ({})",
                variable,
                e.count,
                e.lowest.value,
                unit,
                e.lowest.station_id,
                e.lowest.timestamp.format("%Y-%m-%d %H:%M"),
                e.highest.value,
                unit,
                e.highest.station_id,
                e.highest.timestamp.format("%Y-%m-%d %H:%M")
            ));
        }
        out
    }
}

fn bounds(stations: &[Station]) -> Option<GeographicBounds> {
    stations
        .iter()
        .filter_map(Station::location)
        .fold(None, |acc: Option<GeographicBounds>, (lat, lon)| {
            Some(match acc {
                None => GeographicBounds {
                    min_lat: lat,
                    max_lat: lat,
                    min_lon: lon,
                    max_lon: lon,
                },
                Some(b) => GeographicBounds {
                    min_lat: b.min_lat.min(lat),
                    max_lat: b.max_lat.max(lat),
                    min_lon: b.min_lon.min(lon),
                    max_lon: b.max_lon.max(lon),
                },
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Observation, RegionName};
    use chrono::{TimeZone, Utc};

    fn attributed(station: &str, day: u32, value: Option<f64>) -> AttributedObservation {
        let mut observation = Observation::new(
            station,
            Some(DateTime::parse_from_rfc3339(&format!("2024-02-{:02}T06:00:00-05:00", day)).unwrap()),
            Variable::AirTemperature,
            value.map(|v| v.to_string()),
            "b1",
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        );
        observation.value = value;
        AttributedObservation {
            observation,
            region: RegionName::parse("Cundinamarca"),
        }
    }

    #[test]
    fn test_overview() {
        let data = vec![
            attributed("S1", 1, Some(8.5)),
            attributed("S2", 2, Some(24.0)),
            attributed("S2", 3, None),
        ];
        let stations = vec![
            Station::new("S1", "Páramo").with_coordinates(4.9, -73.8),
            Station::new("S2", "Girardot").with_coordinates(4.3, -74.8),
        ];

        let overview = DatasetOverview::compute(&data, &stations).unwrap();
        assert_eq!(overview.unique_stations, 2);
        assert_eq!(overview.data_quality.null_values, 1);
        assert_eq!(overview.data_quality.clean_records, 2);

        let temp = &overview.extremes[&Variable::AirTemperature];
        assert_eq!(temp.count, 2);
        assert_eq!(temp.lowest.station_id, "S1");
        assert_eq!(temp.highest.value, 24.0);

        let bounds = overview.geographic_bounds.unwrap();
        assert_eq!(bounds.min_lon, -74.8);
        assert!(overview.detailed_summary().contains("air_temperature"));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(
            DatasetOverview::compute(&[], &[]),
            Err(PipelineError::MissingData(_))
        ));
    }
}
