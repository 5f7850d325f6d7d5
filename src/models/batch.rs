use crate::models::{MergeKey, Observation, Station};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Filters sent to the remote source with every page request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceQuery {
    pub department: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub station_code: Option<String>,
}

impl SourceQuery {
    pub fn for_department(department: impl Into<String>) -> Self {
        Self {
            department: Some(department.into()),
            ..Self::default()
        }
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn for_station(mut self, station_code: impl Into<String>) -> Self {
        self.station_code = Some(station_code.into());
        self
    }
}

/// Shape of a column as observed in a page or stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Nested,
}

impl FieldKind {
    pub fn of_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(_) => Some(FieldKind::Text),
            serde_json::Value::Number(_) => Some(FieldKind::Number),
            serde_json::Value::Bool(_) => Some(FieldKind::Boolean),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Some(FieldKind::Nested),
        }
    }

    /// Scalar columns can be coerced into the canonical schema.
    pub fn is_scalar(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    pub extracted_at: DateTime<Utc>,
    pub query: SourceQuery,
    pub offset: u64,
    pub record_count: usize,
    pub page_count: usize,
    /// Source rows that could not be mapped to a supported variable.
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub metadata: BatchMetadata,
    pub columns: BTreeMap<String, FieldKind>,
    pub observations: Vec<Observation>,
    pub stations: Vec<Station>,
}

impl Batch {
    pub fn new(metadata: BatchMetadata, observations: Vec<Observation>) -> Self {
        Self {
            metadata,
            columns: BTreeMap::new(),
            observations,
            stations: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: BTreeMap<String, FieldKind>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_stations(mut self, stations: Vec<Station>) -> Self {
        self.stations = stations;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.metadata.skipped_rows == 0
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn batch_id(&self) -> &str {
        &self.metadata.batch_id
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.metadata.extracted_at
    }
}

/// A canonical, duplicate-free set of observations with its station catalogue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub observations: Vec<Observation>,
    pub stations: BTreeMap<String, Station>,
}

impl Dataset {
    pub fn new(observations: Vec<Observation>, stations: Vec<Station>) -> Self {
        Self {
            observations,
            stations: stations.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn station_list(&self) -> Vec<Station> {
        self.stations.values().cloned().collect()
    }

    pub fn station_ids(&self) -> BTreeSet<&str> {
        self.observations
            .iter()
            .map(|o| o.station_id.as_str())
            .collect()
    }

    pub fn has_unique_keys(&self) -> bool {
        let keys: BTreeSet<MergeKey> = self.observations.iter().map(|o| o.merge_key()).collect();
        keys.len() == self.observations.len()
    }
}
