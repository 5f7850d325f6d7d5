use crate::error::Result;
use crate::models::{Batch, Station};
use crate::utils::constants::RAW_COLUMNS;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

/// Stores fetched batches as CSV so later runs can consolidate them.
pub struct RawBatchWriter;

impl RawBatchWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write all batches to one CSV file with the canonical raw columns.
    /// Returns the number of observation rows written.
    pub fn write_batches(&self, batches: &[Batch], path: &Path) -> Result<usize> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(RAW_COLUMNS)?;

        let mut rows = 0;
        for batch in batches {
            let stations: HashMap<&str, &Station> =
                batch.stations.iter().map(|s| (s.id.as_str(), s)).collect();
            let extracted_at = batch.extracted_at().to_rfc3339();

            for obs in &batch.observations {
                let station = stations.get(obs.station_id.as_str()).copied();
                let coordinate = |f: fn(&Station) -> Option<f64>| {
                    station
                        .and_then(f)
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                };

                writer.write_record([
                    obs.station_id.clone(),
                    obs.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    obs.variable.as_str().to_string(),
                    obs.raw_value.clone().unwrap_or_default(),
                    obs.unit.clone(),
                    batch.batch_id().to_string(),
                    extracted_at.clone(),
                    station.map(|s| s.name.clone()).unwrap_or_default(),
                    station.and_then(|s| s.department.clone()).unwrap_or_default(),
                    station.and_then(|s| s.municipality.clone()).unwrap_or_default(),
                    coordinate(|s| s.latitude),
                    coordinate(|s| s.longitude),
                ])?;
                rows += 1;
            }
        }

        writer.flush()?;
        info!(
            "Wrote {} raw observations from {} batches to {}",
            rows,
            batches.len(),
            path.display()
        );
        Ok(rows)
    }
}

impl Default for RawBatchWriter {
    fn default() -> Self {
        Self::new()
    }
}
