use crate::error::{PipelineError, Result};
use crate::models::{Batch, BatchMetadata, FieldKind, Observation, SourceQuery, Station, Variable};
use crate::utils::coordinates::parse_location;
use crate::utils::time::parse_timestamp;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

struct Columns {
    index: BTreeMap<String, usize>,
}

impl Columns {
    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        let value = record.get(*self.index.get(name)?)?.trim();
        (!value.is_empty()).then_some(value)
    }
}

#[derive(Default)]
struct PendingBatch {
    extracted_at: Option<DateTime<Utc>>,
    observations: Vec<Observation>,
    stations: BTreeMap<String, Station>,
    skipped: usize,
}

/// Reads raw CSV files written by `RawBatchWriter` back into batches,
/// one batch per stored `batch_id`.
pub struct RawFileReader {
    utc_offset: FixedOffset,
}

impl RawFileReader {
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<Batch>> {
        let file = File::open(path)?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));

        let headers = reader.headers()?.clone();
        let columns = Columns {
            index: headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.trim().to_string(), i))
                .collect(),
        };
        let column_kinds: BTreeMap<String, FieldKind> = columns
            .index
            .keys()
            .map(|name| (name.clone(), FieldKind::Text))
            .collect();

        let fallback_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "raw".to_string());
        let fallback_time: DateTime<Utc> = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut pending: BTreeMap<String, PendingBatch> = BTreeMap::new();

        for result in reader.records() {
            let record = result?;
            let batch_id = columns
                .get(&record, "batch_id")
                .map(str::to_string)
                .unwrap_or_else(|| fallback_id.clone());
            let entry = pending.entry(batch_id.clone()).or_default();

            let extracted_at = columns
                .get(&record, "extracted_at")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(fallback_time);
            entry.extracted_at = Some(entry.extracted_at.map_or(extracted_at, |t| t.max(extracted_at)));

            let station_id = columns.get(&record, "station_id");
            let variable = columns.get(&record, "variable").and_then(Variable::parse);
            let (Some(station_id), Some(variable)) = (station_id, variable) else {
                entry.skipped += 1;
                continue;
            };

            let timestamp = columns
                .get(&record, "timestamp")
                .and_then(|s| parse_timestamp(s, self.utc_offset));
            let mut observation = Observation::new(
                station_id,
                timestamp,
                variable,
                columns.get(&record, "value").map(str::to_string),
                batch_id,
                extracted_at,
            );
            if let Some(unit) = columns.get(&record, "unit") {
                observation = observation.with_unit(unit);
            }
            entry.observations.push(observation);

            entry
                .stations
                .entry(station_id.to_string())
                .or_insert_with(|| {
                    let mut station = Station::new(
                        station_id,
                        columns.get(&record, "station_name").unwrap_or_default(),
                    );
                    station.department = columns.get(&record, "department").map(str::to_string);
                    station.municipality = columns.get(&record, "municipality").map(str::to_string);
                    if let Some((lat, lon)) = parse_location(
                        columns.get(&record, "latitude"),
                        columns.get(&record, "longitude"),
                    ) {
                        station = station.with_coordinates(lat, lon);
                    }
                    station.updated_at = Some(extracted_at);
                    station
                });
        }

        // A file with a header but no rows still carries its schema.
        if pending.is_empty() {
            pending.insert(fallback_id.clone(), PendingBatch::default());
        }

        let batches: Vec<Batch> = pending
            .into_iter()
            .map(|(batch_id, p)| {
                if p.skipped > 0 {
                    warn!(
                        "{}: skipped {} rows without station or supported variable in batch {}",
                        path.display(),
                        p.skipped,
                        batch_id
                    );
                }
                let metadata = BatchMetadata {
                    batch_id,
                    extracted_at: p.extracted_at.unwrap_or(fallback_time),
                    query: SourceQuery::default(),
                    offset: 0,
                    record_count: p.observations.len(),
                    page_count: 1,
                    skipped_rows: p.skipped,
                };
                Batch::new(metadata, p.observations)
                    .with_columns(column_kinds.clone())
                    .with_stations(p.stations.into_values().collect())
            })
            .collect();

        debug!("Read {} batches from {}", batches.len(), path.display());
        Ok(batches)
    }

    /// Read several files; batches are returned in file order.
    pub fn read_files(&self, paths: &[PathBuf]) -> Result<Vec<Batch>> {
        let mut batches = Vec::new();
        for path in paths {
            batches.extend(self.read_file(path)?);
        }
        info!("Read {} raw batches from {} files", batches.len(), paths.len());
        Ok(batches)
    }

    /// All `*.csv` files in a directory, sorted by name.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(PipelineError::MissingData(format!(
                "Raw data directory not found: {}",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
            .collect();
        files.sort();
        Ok(files)
    }
}
