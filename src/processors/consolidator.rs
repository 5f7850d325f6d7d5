use crate::error::{PipelineError, Result};
use crate::models::{Batch, Dataset, MergeKey, Observation, Station};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A canonical field and the column names it may arrive under
/// (remote source name, stored raw file name).
#[derive(Debug, Clone, Copy)]
pub struct CanonicalField {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

pub const CANONICAL_SCHEMA: [CanonicalField; 4] = [
    CanonicalField {
        name: "station_id",
        columns: &["codigoestacion", "station_id"],
    },
    CanonicalField {
        name: "timestamp",
        columns: &["fechaobservacion", "timestamp"],
    },
    CanonicalField {
        name: "variable",
        columns: &["descripcionsensor", "variable"],
    },
    CanonicalField {
        name: "value",
        columns: &["valorobservado", "value"],
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationStats {
    pub batches: usize,
    pub existing: usize,
    pub incoming: usize,
    /// Incoming records whose key was not present yet.
    pub inserted: usize,
    /// Colliding incoming records that replaced an older extraction.
    pub replaced: usize,
    /// Colliding incoming records discarded in favour of the existing one.
    pub kept: usize,
    pub output: usize,
}

impl ConsolidationStats {
    /// Incoming records whose merge key collided with a record already present.
    pub fn duplicates(&self) -> usize {
        self.replaced + self.kept
    }
}

/// Merges batches into a duplicate-free dataset keyed by
/// (station, timestamp, variable). The newest extraction wins a collision,
/// and within a batch the later row wins; equal extraction times from
/// different batches keep the record already present.
pub struct Consolidator;

impl Consolidator {
    pub fn new() -> Self {
        Self
    }

    /// Verify a batch's column set maps onto the canonical schema.
    /// Batches built in-process carry no column set and are accepted as typed.
    pub fn check_schema(&self, batch: &Batch) -> Result<()> {
        if batch.columns.is_empty() {
            return Ok(());
        }

        let mut missing = Vec::new();
        let mut incompatible = Vec::new();

        for field in CANONICAL_SCHEMA {
            let found = field
                .columns
                .iter()
                .find_map(|c| batch.columns.get(*c).map(|kind| (*c, *kind)));
            match found {
                None => missing.push(field.name.to_string()),
                Some((column, kind)) if !kind.is_scalar() => {
                    incompatible.push(format!("{} ({:?})", column, kind))
                }
                Some(_) => {}
            }
        }

        if missing.is_empty() && incompatible.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::SchemaMismatch {
                batch_id: batch.batch_id().to_string(),
                missing,
                incompatible,
            })
        }
    }

    /// Merge `new_batches` into `existing`, returning the merged dataset and
    /// the number of incoming records whose key collided.
    pub fn consolidate(&self, existing: &Dataset, new_batches: Vec<Batch>) -> Result<(Dataset, usize)> {
        let (dataset, stats) = self.consolidate_with_stats(existing, new_batches)?;
        Ok((dataset, stats.duplicates()))
    }

    pub fn consolidate_with_stats(
        &self,
        existing: &Dataset,
        mut new_batches: Vec<Batch>,
    ) -> Result<(Dataset, ConsolidationStats)> {
        // Nothing is merged unless every batch passes.
        for batch in &new_batches {
            self.check_schema(batch)?;
        }

        let mut stats = ConsolidationStats {
            batches: new_batches.len(),
            existing: existing.len(),
            ..Default::default()
        };

        let mut merged: BTreeMap<MergeKey, Observation> = BTreeMap::new();
        for obs in &existing.observations {
            merge_observation(&mut merged, obs.clone());
        }
        let mut stations = existing.stations.clone();

        new_batches.sort_by(|a, b| {
            a.extracted_at()
                .cmp(&b.extracted_at())
                .then_with(|| a.batch_id().cmp(b.batch_id()))
        });

        for batch in new_batches {
            debug!(
                "Merging batch {} ({} records, extracted {})",
                batch.batch_id(),
                batch.len(),
                batch.extracted_at()
            );

            for obs in batch.observations {
                stats.incoming += 1;
                match merge_observation(&mut merged, obs) {
                    MergeOutcome::Inserted => stats.inserted += 1,
                    MergeOutcome::Replaced => stats.replaced += 1,
                    MergeOutcome::Kept => stats.kept += 1,
                }
            }

            for station in batch.stations {
                merge_station(&mut stations, station);
            }
        }

        let observations: Vec<Observation> = merged.into_values().collect();
        stats.output = observations.len();

        info!(
            "Consolidated {} batches: {} incoming, {} inserted, {} replaced, {} kept, {} total",
            stats.batches, stats.incoming, stats.inserted, stats.replaced, stats.kept, stats.output
        );

        Ok((
            Dataset {
                observations,
                stations,
            },
            stats,
        ))
    }
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new()
    }
}

enum MergeOutcome {
    Inserted,
    Replaced,
    Kept,
}

fn merge_observation(merged: &mut BTreeMap<MergeKey, Observation>, obs: Observation) -> MergeOutcome {
    let key = obs.merge_key();
    match merged.get_mut(&key) {
        None => {
            merged.insert(key, obs);
            MergeOutcome::Inserted
        }
        Some(current) if supersedes(&obs, current) => {
            *current = obs;
            MergeOutcome::Replaced
        }
        Some(_) => MergeOutcome::Kept,
    }
}

/// A newer extraction wins. Within one batch the later row is the last
/// write; across batches with equal extraction times the existing record stays.
fn supersedes(incoming: &Observation, current: &Observation) -> bool {
    incoming.extracted_at > current.extracted_at
        || (incoming.extracted_at == current.extracted_at && incoming.batch_id == current.batch_id)
}

fn merge_station(stations: &mut BTreeMap<String, Station>, station: Station) {
    match stations.get_mut(&station.id) {
        None => {
            stations.insert(station.id.clone(), station);
        }
        Some(current) if station.updated_at > current.updated_at => *current = station,
        Some(_) => {}
    }
}
