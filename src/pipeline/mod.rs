//! Consumer-facing operations over the Fetcher → Consolidator → Cleaner →
//! SpatialAttributor → AnalysisEngine chain.
//!
//! Every stage takes the previous stage's output by reference and returns a
//! new value. State between stages is passed explicitly; the only shared
//! resource is the read-only region index.

pub mod station_filter;

pub use station_filter::{RadiusFilter, StationFilter};

use crate::analyzers::{summarize, SummaryOptions};
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::models::{
    AttributedDataset, AttributedObservation, Batch, CleaningReport, Dataset, Granularity,
    SourceQuery, Station, TrendSummary, Variable,
};
use crate::processors::{
    Cleaner, ConsolidationStats, Consolidator, RegionIndex, ShardedExecutor, SpatialAttributor,
    VariableRules,
};
use crate::readers::{
    drain_batches, stations_from_batches, FetchCheckpoint, Fetcher, PageSource, RawFileReader,
    RegionReader, SocrataClient,
};
use crate::utils::filename::{
    next_free_path, processed_dataset_filename, raw_batch_filename, trend_summary_filename,
};
use crate::writers::{ParquetWriter, RawBatchWriter};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of one extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionSummary {
    pub batches: usize,
    pub pages: usize,
    pub records: usize,
    pub skipped_rows: usize,
    pub stations: usize,
    /// Offset of the last page that produced a batch.
    pub last_offset: Option<u64>,
    /// Where a follow-up extraction should start.
    pub next_checkpoint: FetchCheckpoint,
    pub columns: BTreeSet<String>,
    /// Raw CSV written for this extraction, if any rows came back.
    pub output: Option<PathBuf>,
}

impl ExtractionSummary {
    fn from_batches(batches: &[Batch], next_checkpoint: FetchCheckpoint) -> Self {
        Self {
            batches: batches.len(),
            pages: batches.iter().map(|b| b.metadata.page_count).sum(),
            records: batches.iter().map(Batch::len).sum(),
            skipped_rows: batches.iter().map(|b| b.metadata.skipped_rows).sum(),
            stations: stations_from_batches(batches).len(),
            last_offset: batches.last().map(|b| b.metadata.offset),
            next_checkpoint,
            columns: batches
                .iter()
                .flat_map(|b| b.columns.keys().cloned())
                .collect(),
            output: None,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "=== Extraction Summary ===\n\
            Batches: {} ({} pages)\n\
            Records: {} ({} rows skipped)\n\
            Stations: {}\n\
            Next offset: {}\n\
            Output: {}",
            self.batches,
            self.pages,
            self.records,
            self.skipped_rows,
            self.stations,
            self.next_checkpoint.next_offset,
            self.output
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        )
    }
}

/// Result of consolidating, cleaning and attributing raw data.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub consolidation: ConsolidationStats,
    pub cleaning: CleaningReport,
    pub dataset: AttributedDataset,
    /// Parquet file holding the attributed dataset, when one was written.
    pub output: Option<PathBuf>,
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub extraction: ExtractionSummary,
    pub processing: ProcessingOutcome,
    pub summary: TrendSummary,
    pub summary_output: Option<PathBuf>,
}

pub struct ClimatePipeline<S> {
    settings: Settings,
    fetcher: Fetcher<S>,
    regions: Arc<RegionIndex>,
    rules: VariableRules,
    executor: Option<ShardedExecutor>,
    parquet: ParquetWriter,
    cancel: CancellationToken,
    persist: bool,
}

impl ClimatePipeline<SocrataClient> {
    /// Pipeline against the configured remote source, with regions loaded
    /// from the configured GeoJSON file (none when unset).
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let client = SocrataClient::from_settings(&settings.source)?;
        let regions = load_regions(&settings)?;
        Self::new(client, settings, Arc::new(regions))
    }
}

impl<S: PageSource> ClimatePipeline<S> {
    pub fn new(source: S, settings: Settings, regions: Arc<RegionIndex>) -> Result<Self> {
        let fetcher = Fetcher::new(source, settings.fetcher_config()?);
        let rules = settings.variable_rules();
        Ok(Self {
            settings,
            fetcher,
            regions,
            rules,
            executor: None,
            parquet: ParquetWriter::new(),
            cancel: CancellationToken::new(),
            persist: true,
        })
    }

    /// Shard cleaning and attribution across a worker pool.
    pub fn with_executor(mut self, executor: ShardedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_parquet_writer(mut self, writer: ParquetWriter) -> Self {
        self.parquet = writer;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Keep results in memory only.
    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn regions(&self) -> Arc<RegionIndex> {
        Arc::clone(&self.regions)
    }

    fn check_cancelled(&self, stage: &'static str) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Run cancelled before {}", stage);
            Err(PipelineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }

    fn query_label(query: &SourceQuery) -> String {
        match (&query.department, &query.station_code) {
            (_, Some(station)) => format!("station_{}", station),
            (Some(department), None) => department.clone(),
            (None, None) => "all".to_string(),
        }
    }

    /// Fetch all pages for `query` from the start.
    pub async fn extract(&self, query: &SourceQuery) -> Result<ExtractionSummary> {
        self.extract_from(query, FetchCheckpoint::default()).await
    }

    /// Fetch from `checkpoint` and store the batches as a raw CSV file. When
    /// a page fails, batches fetched before it are still stored and the
    /// error carries the offset to resume from.
    pub async fn extract_from(
        &self,
        query: &SourceQuery,
        checkpoint: FetchCheckpoint,
    ) -> Result<ExtractionSummary> {
        let (batches, failure) = self.fetch_batches(query, checkpoint).await?;

        let next_checkpoint = match batches.last() {
            Some(last) => self.fetcher.checkpoint_after(last),
            None => checkpoint,
        };
        let mut summary = ExtractionSummary::from_batches(&batches, next_checkpoint);

        if self.persist && summary.records > 0 {
            let path = next_free_path(raw_batch_filename(
                &self.settings.paths.raw_dir,
                &Self::query_label(query),
                Utc::now(),
            ));
            RawBatchWriter::new().write_batches(&batches, &path)?;
            summary.output = Some(path);
        }

        match failure {
            Some(error) => {
                warn!(
                    "Extraction stopped after {} batches; stored batches are kept",
                    summary.batches
                );
                Err(error)
            }
            None => {
                info!(
                    "Extracted {} records in {} batches",
                    summary.records, summary.batches
                );
                Ok(summary)
            }
        }
    }

    async fn fetch_batches(
        &self,
        query: &SourceQuery,
        checkpoint: FetchCheckpoint,
    ) -> Result<(Vec<Batch>, Option<PipelineError>)> {
        self.check_cancelled("fetch")?;
        let drained = drain_batches(self.fetcher.fetch(query, checkpoint), &self.cancel).await?;

        // Raw files always carry the canonical header, so a drifted source
        // schema has to be rejected before anything is stored.
        let consolidator = Consolidator::new();
        for batch in &drained.batches {
            consolidator.check_schema(batch)?;
        }
        Ok((drained.batches, drained.error))
    }

    /// Consolidate stored raw files, then clean and attribute the result.
    pub fn process(&self, raw_files: &[PathBuf]) -> Result<ProcessingOutcome> {
        let reader = RawFileReader::new(self.settings.source.utc_offset()?);
        let batches = reader.read_files(raw_files)?;
        self.process_batches(&Dataset::default(), batches)
    }

    /// Every stored raw file in the configured raw directory.
    pub fn stored_raw_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.settings.paths.raw_dir;
        if dir.is_dir() {
            RawFileReader::discover(dir)
        } else {
            Ok(Vec::new())
        }
    }

    /// Merge `batches` into `existing` and run cleaning and attribution.
    /// Nothing is written unless every stage completes.
    pub fn process_batches(&self, existing: &Dataset, batches: Vec<Batch>) -> Result<ProcessingOutcome> {
        self.check_cancelled("consolidate")?;
        let (consolidated, consolidation) =
            Consolidator::new().consolidate_with_stats(existing, batches)?;
        info!(
            "Consolidated {} observations ({} duplicates)",
            consolidated.len(),
            consolidation.duplicates()
        );

        self.check_cancelled("clean")?;
        let mut cleaner = Cleaner::new(self.rules.clone());
        if let Some(executor) = &self.executor {
            cleaner = cleaner.with_executor(executor.clone());
        }
        let (clean, cleaning) = cleaner.clean(&consolidated);

        self.check_cancelled("attribute")?;
        let mut attributor = SpatialAttributor::new(self.regions());
        if let Some(executor) = &self.executor {
            attributor = attributor.with_executor(executor.clone());
        }
        let dataset = attributor.attribute(&clean, &clean.station_list());

        self.check_cancelled("store")?;
        let output = if self.persist && !dataset.observations.is_empty() {
            let dir = &self.settings.paths.processed_dir;
            std::fs::create_dir_all(dir)?;
            let path = next_free_path(processed_dataset_filename(dir, Utc::now()));
            self.parquet.write_observations(&dataset.observations, &path)?;
            Some(path)
        } else {
            None
        };

        Ok(ProcessingOutcome {
            consolidation,
            cleaning,
            dataset,
            output,
        })
    }

    /// Time-bucketed statistics. An empty `variables` slice means all.
    pub fn analyze(
        &self,
        observations: &[AttributedObservation],
        granularity: Granularity,
        variables: &[Variable],
        options: &SummaryOptions,
    ) -> Result<TrendSummary> {
        self.check_cancelled("analyze")?;
        Ok(summarize(observations, granularity, variables, options))
    }

    /// Analyze a processed Parquet file.
    pub fn analyze_file(
        &self,
        path: &Path,
        granularity: Granularity,
        variables: &[Variable],
        options: &SummaryOptions,
    ) -> Result<TrendSummary> {
        let observations = self.parquet.read_observations(path, 0)?;
        self.analyze(&observations, granularity, variables, options)
    }

    /// Stations from the source catalogue, with regions filled in and the
    /// filter applied.
    pub async fn list_stations(&self, filter: &StationFilter) -> Result<Vec<Station>> {
        let query = SourceQuery {
            department: filter.department.clone(),
            ..SourceQuery::default()
        };
        let catalogue = self
            .fetcher
            .station_catalogue(&query, self.settings.source.page_size)
            .await?;
        Ok(filter.apply(catalogue, &self.regions))
    }

    /// Extract, process everything stored so far, and summarize. The
    /// cancellation token is checked between stages.
    pub async fn run(&self, query: &SourceQuery, granularity: Granularity) -> Result<RunOutcome> {
        let (batches, failure) = self.fetch_batches(query, FetchCheckpoint::default()).await?;
        if let Some(error) = failure {
            return Err(error);
        }

        let next_checkpoint = batches
            .last()
            .map(|last| self.fetcher.checkpoint_after(last))
            .unwrap_or_default();
        let mut extraction = ExtractionSummary::from_batches(&batches, next_checkpoint);

        self.check_cancelled("store raw batches")?;
        let previous = self.stored_raw_files()?;
        let mut all_batches =
            RawFileReader::new(self.settings.source.utc_offset()?).read_files(&previous)?;
        if self.persist && extraction.records > 0 {
            let path = next_free_path(raw_batch_filename(
                &self.settings.paths.raw_dir,
                &Self::query_label(query),
                Utc::now(),
            ));
            RawBatchWriter::new().write_batches(&batches, &path)?;
            extraction.output = Some(path);
        }
        all_batches.extend(batches);

        let processing = self.process_batches(&Dataset::default(), all_batches)?;
        let summary = self.analyze(
            &processing.dataset.observations,
            granularity,
            &[],
            &SummaryOptions::default(),
        )?;

        let summary_output = if self.persist && !summary.is_empty() {
            let dir = &self.settings.paths.processed_dir;
            let label = match granularity {
                Granularity::Year => "year",
                Granularity::YearMonth => "year_month",
            };
            let path = next_free_path(trend_summary_filename(dir, label, Utc::now()));
            self.parquet.write_trend_summary(&summary, &path)?;
            Some(path)
        } else {
            None
        };

        Ok(RunOutcome {
            extraction,
            processing,
            summary,
            summary_output,
        })
    }
}

/// Region index from the configured GeoJSON file; empty when none is set.
pub fn load_regions(settings: &Settings) -> Result<RegionIndex> {
    match &settings.spatial.regions_file {
        Some(path) => {
            let regions = RegionReader::from_settings(&settings.spatial).read_file(path)?;
            Ok(RegionIndex::new(regions))
        }
        None => {
            warn!("No regions file configured; every observation will be attributed to 'unknown'");
            Ok(RegionIndex::empty())
        }
    }
}
