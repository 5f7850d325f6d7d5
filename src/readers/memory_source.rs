use crate::error::{PageError, PipelineError, Result};
use crate::models::SourceQuery;
use crate::readers::socrata_client::{Page, PageSource, SourceRow};
use crate::utils::constants::{COL_DEPARTMENT, COL_STATION_CODE, COL_TIMESTAMP};
use chrono::NaiveDate;
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Page source over rows held in memory, e.g. a saved API export.
/// Applies the same department, station and date filters as the remote source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<SourceRow>,
}

impl MemorySource {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self { rows }
    }

    /// Load a JSON array of row objects as returned by the source API.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let value: Value = serde_json::from_reader(reader)?;

        let Value::Array(items) = value else {
            return Err(PipelineError::InvalidFormat(format!(
                "{}: expected a JSON array of records",
                path.display()
            )));
        };

        let rows: Vec<SourceRow> = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();

        info!("Loaded {} source rows from {}", rows.len(), path.display());
        Ok(Self::new(rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn matches(row: &SourceRow, query: &SourceQuery) -> bool {
        let field = |key: &str| row.get(key).and_then(Value::as_str).map(str::trim);

        if let Some(department) = &query.department {
            if !field(COL_DEPARTMENT).is_some_and(|d| d.eq_ignore_ascii_case(department.trim())) {
                return false;
            }
        }
        if let Some(code) = &query.station_code {
            let station = match row.get(COL_STATION_CODE) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return false,
            };
            if station != code.trim() {
                return false;
            }
        }
        if query.start_date.is_some() || query.end_date.is_some() {
            let Some(date) = field(COL_TIMESTAMP)
                .and_then(|ts| ts.get(..10))
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                return false;
            };
            if query.start_date.is_some_and(|start| date < start)
                || query.end_date.is_some_and(|end| date > end)
            {
                return false;
            }
        }
        true
    }
}

impl PageSource for MemorySource {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        offset: u64,
        limit: usize,
    ) -> std::result::Result<Page, PageError> {
        let rows = self
            .rows
            .iter()
            .filter(|row| Self::matches(row, query))
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .collect();
        Ok(Page::new(rows))
    }
}
