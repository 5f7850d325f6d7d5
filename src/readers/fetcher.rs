use crate::error::{PageError, PipelineError, Result};
use crate::models::{Batch, BatchMetadata, FieldKind, Observation, SourceQuery, Station, Variable};
use crate::readers::socrata_client::{Page, PageSource, SourceRow};
use crate::utils::backoff::BackoffPolicy;
use crate::utils::constants::*;
use crate::utils::coordinates::parse_location;
use crate::utils::time::{offset_hours, parse_timestamp};
use chrono::{DateTime, FixedOffset, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use futures_util::{future, pin_mut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FetcherConfig {
    pub page_size: usize,
    /// Page requests allowed in flight at once.
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Offset given to source timestamps that carry none.
    pub utc_offset: FixedOffset,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            backoff: BackoffPolicy::with_max_retries(DEFAULT_MAX_RETRIES),
            utc_offset: offset_hours(DEFAULT_SOURCE_UTC_OFFSET_HOURS),
        }
    }
}

/// Position from which a fetch sequence starts (or restarts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCheckpoint {
    pub next_offset: u64,
}

impl FetchCheckpoint {
    pub fn at(offset: u64) -> Self {
        Self {
            next_offset: offset,
        }
    }

    /// Checkpoint to resume from after a failed run.
    pub fn from_error(error: &PipelineError) -> Option<Self> {
        error.resume_offset().map(Self::at)
    }
}

/// Maps loosely typed source rows onto [`Observation`] and [`Station`] once,
/// at ingestion.
#[derive(Debug, Clone, Copy)]
pub struct RowMapper {
    utc_offset: FixedOffset,
}

impl RowMapper {
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    pub fn map_page(&self, page: &Page, mut metadata: BatchMetadata) -> Batch {
        let mut columns: BTreeMap<String, FieldKind> = BTreeMap::new();
        let mut observations = Vec::with_capacity(page.len());
        let mut stations: BTreeMap<String, Station> = BTreeMap::new();
        let mut skipped = 0;

        for row in &page.rows {
            record_columns(&mut columns, row);

            let Some(station_id) = text(row, COL_STATION_CODE) else {
                skipped += 1;
                continue;
            };
            let Some(variable) = text(row, COL_SENSOR).and_then(|s| Variable::parse(&s)) else {
                skipped += 1;
                continue;
            };

            let timestamp = text(row, COL_TIMESTAMP).and_then(|s| parse_timestamp(&s, self.utc_offset));
            let mut observation = Observation::new(
                station_id.clone(),
                timestamp,
                variable,
                text(row, COL_VALUE),
                metadata.batch_id.clone(),
                metadata.extracted_at,
            );
            if let Some(unit) = text(row, COL_UNIT) {
                observation = observation.with_unit(unit);
            }
            observations.push(observation);

            stations
                .entry(station_id)
                .or_insert_with_key(|id| station_from_row(id, row, metadata.extracted_at));
        }

        if skipped > 0 {
            debug!(
                "Skipped {} rows without a station or a supported variable at offset {}",
                skipped, metadata.offset
            );
        }

        metadata.record_count = observations.len();
        metadata.skipped_rows = skipped;

        Batch::new(metadata, observations)
            .with_columns(columns)
            .with_stations(stations.into_values().collect())
    }
}

fn record_columns(columns: &mut BTreeMap<String, FieldKind>, row: &SourceRow) {
    for (name, value) in row {
        if let Some(kind) = FieldKind::of_json(value) {
            columns
                .entry(name.clone())
                .and_modify(|existing| *existing = widen(*existing, kind))
                .or_insert(kind);
        }
    }
}

/// Common kind of a column seen with two kinds across rows.
fn widen(a: FieldKind, b: FieldKind) -> FieldKind {
    if a == b {
        a
    } else if a == FieldKind::Nested || b == FieldKind::Nested {
        FieldKind::Nested
    } else {
        FieldKind::Text
    }
}

fn text(row: &SourceRow, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn station_from_row(id: &str, row: &SourceRow, extracted_at: DateTime<Utc>) -> Station {
    let mut station = Station::new(id, text(row, COL_STATION_NAME).unwrap_or_default());
    station.department = text(row, COL_DEPARTMENT);
    station.municipality = text(row, COL_MUNICIPALITY);
    if let Some((lat, lon)) = parse_location(
        text(row, COL_LATITUDE).as_deref(),
        text(row, COL_LONGITUDE).as_deref(),
    ) {
        station = station.with_coordinates(lat, lon);
    }
    station.updated_at = Some(extracted_at);
    station
}

/// Pages a [`PageSource`] into a lazy sequence of [`Batch`]es.
pub struct Fetcher<S> {
    source: Arc<S>,
    config: FetcherConfig,
    mapper: RowMapper,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, config: FetcherConfig) -> Self {
        Self::with_shared(Arc::new(source), config)
    }

    pub fn with_shared(source: Arc<S>, config: FetcherConfig) -> Self {
        let mapper = RowMapper::new(config.utc_offset);
        Self {
            source,
            config,
            mapper,
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    fn page_size(&self) -> usize {
        self.config.page_size.max(1)
    }

    /// Fetch and map the single page at `offset`, retrying transient failures.
    pub async fn fetch_batch(&self, query: &SourceQuery, offset: u64, run_id: &str) -> Result<Batch> {
        let limit = self.page_size();
        let timeout = self.config.request_timeout;
        let source = self.source.as_ref();
        let operation = format!("fetch page at offset {}", offset);

        let page = self
            .config
            .backoff
            .retry(&operation, |_| async move {
                match tokio::time::timeout(timeout, source.fetch_page(query, offset, limit)).await {
                    Ok(result) => result,
                    Err(_) => Err(PageError::Timeout(timeout)),
                }
            })
            .await
            .map_err(|failure| PipelineError::Extraction {
                offset,
                attempts: failure.attempts,
                source: failure.error,
            })?;

        let metadata = BatchMetadata {
            batch_id: format!("{}-{:012}", run_id, offset),
            extracted_at: Utc::now(),
            query: query.clone(),
            offset,
            record_count: 0,
            page_count: 1,
            skipped_rows: 0,
        };

        Ok(self.mapper.map_page(&page, metadata))
    }

    /// Lazy batch sequence starting at `checkpoint`. Up to `concurrency`
    /// pages are requested ahead; batches are yielded in offset order. The
    /// sequence ends at the first empty page, or right after the first error.
    pub fn fetch<'a>(
        &'a self,
        query: &'a SourceQuery,
        checkpoint: FetchCheckpoint,
    ) -> impl Stream<Item = Result<Batch>> + 'a {
        let page_size = self.page_size() as u64;
        let start = checkpoint.next_offset;
        let run_id = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();

        info!(
            "Fetching from offset {} (page size {}, concurrency {})",
            start,
            page_size,
            self.config.concurrency.max(1)
        );

        stream::iter((0u64..).map(move |page| start + page * page_size))
            .map(move |offset| {
                let run_id = run_id.clone();
                async move { self.fetch_batch(query, offset, &run_id).await }
            })
            .buffered(self.config.concurrency.max(1))
            .scan(false, |failed, result| {
                let item = if *failed {
                    None
                } else {
                    match result {
                        Ok(batch) if batch.is_empty() => {
                            debug!("Empty page at offset {}; source exhausted", batch.metadata.offset);
                            None
                        }
                        Ok(batch) => Some(Ok(batch)),
                        Err(e) => {
                            warn!("Fetch stopped: {}", e);
                            *failed = true;
                            Some(Err(e))
                        }
                    }
                };
                future::ready(item)
            })
    }

    /// Checkpoint pointing at the page after `batch`.
    pub fn checkpoint_after(&self, batch: &Batch) -> FetchCheckpoint {
        FetchCheckpoint::at(batch.metadata.offset + self.page_size() as u64)
    }

    /// Station list from the first `limit` matching rows.
    pub async fn station_catalogue(&self, query: &SourceQuery, limit: usize) -> Result<Vec<Station>> {
        let limited = Fetcher {
            source: Arc::clone(&self.source),
            config: FetcherConfig {
                page_size: limit.max(1),
                ..self.config.clone()
            },
            mapper: self.mapper,
        };
        let batch = limited.fetch_batch(query, 0, "catalogue").await?;
        Ok(batch.stations)
    }
}

/// Batches drained from a fetch stream, and the error that ended it early.
#[derive(Debug)]
pub struct DrainedBatches {
    pub batches: Vec<Batch>,
    pub error: Option<PipelineError>,
}

/// Drain a batch stream, keeping the batches that arrived before a failure.
/// Cancellation discards everything.
pub async fn drain_batches<St>(stream: St, cancel: &CancellationToken) -> Result<DrainedBatches>
where
    St: Stream<Item = Result<Batch>>,
{
    pin_mut!(stream);
    let mut batches = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Fetch cancelled after {} batches", batches.len());
                return Err(PipelineError::Cancelled { stage: "fetch" });
            }
            next = stream.next() => match next {
                Some(Ok(batch)) => batches.push(batch),
                Some(Err(error)) => return Ok(DrainedBatches { batches, error: Some(error) }),
                None => break,
            },
        }
    }

    Ok(DrainedBatches {
        batches,
        error: None,
    })
}

/// Drain a batch stream, failing on the first error or on cancellation.
pub async fn collect_batches<St>(stream: St, cancel: &CancellationToken) -> Result<Vec<Batch>>
where
    St: Stream<Item = Result<Batch>>,
{
    let drained = drain_batches(stream, cancel).await?;
    match drained.error {
        Some(error) => Err(error),
        None => Ok(drained.batches),
    }
}

/// Distinct stations across batches; later extractions replace earlier metadata.
pub fn stations_from_batches(batches: &[Batch]) -> Vec<Station> {
    let mut stations: BTreeMap<String, Station> = BTreeMap::new();
    for station in batches.iter().flat_map(|b| b.stations.iter()) {
        let newer = match stations.get(&station.id) {
            Some(existing) => station.updated_at > existing.updated_at,
            None => true,
        };
        if newer {
            stations.insert(station.id.clone(), station.clone());
        }
    }
    stations.into_values().collect()
}
