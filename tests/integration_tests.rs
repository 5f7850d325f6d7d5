use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use hydromet_pipeline::analyzers::{summarize, SummaryOptions};
use hydromet_pipeline::config::Settings;
use hydromet_pipeline::error::{PageError, PipelineError};
use hydromet_pipeline::models::{
    Batch, BatchMetadata, Dataset, GapReason, Granularity, Observation, RegionName, SourceQuery,
    Station, TimeBucket, Variable,
};
use hydromet_pipeline::pipeline::{ClimatePipeline, StationFilter};
use hydromet_pipeline::processors::{
    attribute, clean, Consolidator, RegionIndex, ShardedExecutor, VariableRules,
};
use hydromet_pipeline::readers::{
    FetchCheckpoint, MemorySource, Page, PageSource, RawFileReader, RegionReader, SourceRow,
};
use hydromet_pipeline::writers::ParquetWriter;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const REGIONS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": {"name": "Bogotá D.C.", "code": "11"},
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[-74.25, 4.45], [-73.95, 4.45], [-73.95, 4.85], [-74.25, 4.85], [-74.25, 4.45]]]
      }
    },
    {
      "type": "Feature",
      "properties": {"name": "Cundinamarca", "code": "25"},
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[-74.95, 3.70], [-74.25, 3.70], [-74.25, 5.80], [-74.95, 5.80], [-74.95, 3.70]]]
      }
    }
  ]
}"#;

fn bogota_time() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).unwrap()
}

fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
    bogota_time()
        .with_ymd_and_hms(2024, 1, day, hour, 0, 0)
        .unwrap()
}

fn extracted(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 12, minute, 0).unwrap()
}

fn region_index() -> Arc<RegionIndex> {
    let regions = RegionReader::new("name")
        .with_code_property("code")
        .parse_str(REGIONS)
        .unwrap();
    Arc::new(RegionIndex::new(regions))
}

fn observation(
    station: &str,
    timestamp: DateTime<FixedOffset>,
    variable: Variable,
    value: &str,
    batch_id: &str,
    extracted_at: DateTime<Utc>,
) -> Observation {
    Observation::new(
        station,
        Some(timestamp),
        variable,
        Some(value.to_string()),
        batch_id,
        extracted_at,
    )
}

fn batch(batch_id: &str, extracted_at: DateTime<Utc>, observations: Vec<Observation>) -> Batch {
    let metadata = BatchMetadata {
        batch_id: batch_id.to_string(),
        extracted_at,
        query: SourceQuery::for_department("CUNDINAMARCA"),
        offset: 0,
        record_count: observations.len(),
        page_count: 1,
        skipped_rows: 0,
    };
    Batch::new(metadata, observations)
}

fn source_row(station: &str, lat: &str, lon: &str, ts: &str, sensor: &str, value: &str) -> SourceRow {
    let row = json!({
        "codigoestacion": station,
        "nombreestacion": format!("Estación {}", station),
        "departamento": "CUNDINAMARCA",
        "municipio": "BOGOTA",
        "latitud": lat,
        "longitud": lon,
        "fechaobservacion": ts,
        "descripcionsensor": sensor,
        "valorobservado": value,
    });
    match row {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn source_rows() -> Vec<SourceRow> {
    vec![
        source_row("BOG1", "4.60", "-74.08", "2024-01-03T08:00:00.000", "Precipitación", "0"),
        source_row("BOG1", "4.60", "-74.08", "2024-01-04T08:00:00.000", "Precipitación", "10"),
        source_row("BOG1", "4.60", "-74.08", "2024-01-05T08:00:00.000", "Precipitación", "20"),
        source_row("BOG1", "4.60", "-74.08", "2024-01-05T08:00:00.000", "Temperatura Aire 2 m", "14,5"),
        source_row("NUL1", "0", "0", "2024-01-03T08:00:00.000", "Precipitación", "5"),
        source_row("BOG1", "4.60", "-74.08", "", "Precipitación", "7"),
    ]
}

fn settings_in(dir: &TempDir, page_size: usize) -> Settings {
    let mut settings = Settings::default();
    settings.source.page_size = page_size;
    settings.paths.raw_dir = dir.path().join("raw");
    settings.paths.processed_dir = dir.path().join("processed");
    settings
}

#[test]
fn test_consolidation_is_idempotent() {
    let first = batch(
        "b1",
        extracted(0),
        vec![
            observation("S1", at(1, 8), Variable::AirTemperature, "21.3", "b1", extracted(0)),
            observation("S1", at(1, 9), Variable::AirTemperature, "21.9", "b1", extracted(0)),
        ],
    );

    let consolidator = Consolidator::new();
    let (once, _) = consolidator
        .consolidate(&Dataset::default(), vec![first.clone()])
        .unwrap();
    let (twice, duplicates) = consolidator.consolidate(&once, vec![first]).unwrap();

    assert_eq!(once, twice);
    assert_eq!(duplicates, 2);
    assert!(twice.has_unique_keys());
}

#[test]
fn test_newer_extraction_wins() {
    let old = batch(
        "b1",
        extracted(0),
        vec![observation("S1", at(1, 8), Variable::AirTemperature, "21.3", "b1", extracted(0))],
    );
    let new = batch(
        "b2",
        extracted(30),
        vec![observation("S1", at(1, 8), Variable::AirTemperature, "22.0", "b2", extracted(30))],
    );

    // Arrival order does not matter, extraction time does.
    let (merged, duplicates) = Consolidator::new()
        .consolidate(&Dataset::default(), vec![new, old])
        .unwrap();

    assert_eq!(duplicates, 1);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged.observations[0].raw_value.as_deref(), Some("22.0"));
    assert_eq!(merged.observations[0].batch_id, "b2");
}

#[test]
fn test_cleaning_counts_and_determinism() {
    let mut records: Vec<Observation> = [15.0, 17.5, 20.0, 22.5, 25.0]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            observation(
                "S1",
                at(i as u32 + 1, 8),
                Variable::AirTemperature,
                &v.to_string(),
                "b1",
                extracted(0),
            )
        })
        .collect();
    records.push(observation("S1", at(20, 8), Variable::AirTemperature, "85.0", "b1", extracted(0)));
    records.push(Observation::new(
        "S1",
        None,
        Variable::AirTemperature,
        Some("19.0".to_string()),
        "b1",
        extracted(0),
    ));
    let input = Dataset::new(records, vec![]);

    let rules = VariableRules::default();
    let (first, report) = clean(&input, &rules);
    let (second, _) = clean(&input, &rules);

    assert_eq!(first, second);
    assert_eq!(first.len(), input.len() - report.dropped);
    assert_eq!(report.dropped, 1);

    let hot = first
        .observations
        .iter()
        .find(|o| o.raw_value.as_deref() == Some("85.0"))
        .unwrap();
    assert!(hot.flags.out_of_range);
    assert!(hot.flags.is_outlier);
    assert_eq!(report.flagged, 1);
}

#[test]
fn test_attribution_is_total() {
    let stations = vec![
        Station::new("BOG1", "El Dorado").with_coordinates(4.60, -74.08),
        Station::new("NUL1", "Null Island").with_coordinates(0.0, 0.0),
        Station::new("NOLOC", "Sin ubicación"),
    ];
    let records = vec![
        observation("BOG1", at(1, 8), Variable::Precipitation, "1.0", "b1", extracted(0)),
        observation("NUL1", at(1, 8), Variable::Precipitation, "2.0", "b1", extracted(0)),
        observation("NOLOC", at(1, 8), Variable::Precipitation, "3.0", "b1", extracted(0)),
        observation("GHOST", at(1, 8), Variable::Precipitation, "4.0", "b1", extracted(0)),
    ];
    let (cleaned, _) = clean(&Dataset::new(records, stations.clone()), &VariableRules::default());

    let attributed = attribute(&cleaned, &stations, region_index());

    assert_eq!(attributed.observations.len(), cleaned.len());
    let region_of = |id: &str| {
        attributed
            .observations
            .iter()
            .find(|o| o.observation.station_id == id)
            .map(|o| o.region.clone())
            .unwrap()
    };
    assert_eq!(region_of("BOG1"), RegionName::Named("Bogotá D.C.".to_string()));
    assert_eq!(region_of("NUL1"), RegionName::Unknown);
    assert_eq!(region_of("NOLOC"), RegionName::Unknown);
    assert_eq!(region_of("GHOST"), RegionName::Unknown);

    let reasons: Vec<(&str, GapReason)> = attributed
        .report
        .gaps
        .iter()
        .map(|g| (g.station_id.as_str(), g.reason))
        .collect();
    assert!(reasons.contains(&("NUL1", GapReason::OutsideRegions)));
    assert!(reasons.contains(&("NOLOC", GapReason::Unlocated)));
    assert!(reasons.contains(&("GHOST", GapReason::UnknownStation)));
    assert_eq!(attributed.report.observations_attributed, 1);
    assert_eq!(attributed.report.observations_unknown, 3);
}

#[test]
fn test_precipitation_summary() {
    let stations = vec![Station::new("ZIP1", "Zipaquirá").with_coordinates(5.02, -74.50)];
    let records = ["0", "10", "20"]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            observation("ZIP1", at(i as u32 + 1, 8), Variable::Precipitation, v, "b1", extracted(0))
        })
        .collect();
    let (cleaned, _) = clean(&Dataset::new(records, stations.clone()), &VariableRules::default());
    let attributed = attribute(&cleaned, &stations, region_index());

    let summary = summarize(
        &attributed.observations,
        Granularity::YearMonth,
        &[],
        &SummaryOptions::default(),
    );

    let stats = summary
        .get("Cundinamarca", Variable::Precipitation, TimeBucket::YearMonth(2024, 1))
        .unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.mean, 10.0);
    assert_eq!(stats.min, 0.0);
    assert_eq!(stats.max, 20.0);
    assert!((stats.std_dev - 10.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_full_run_over_memory_source() {
    let dir = TempDir::new().unwrap();
    let settings = settings_in(&dir, 2);
    let pipeline = ClimatePipeline::new(MemorySource::new(source_rows()), settings, region_index())
        .unwrap()
        .with_executor(ShardedExecutor::new(2).unwrap().with_chunk_size(2));

    let outcome = pipeline
        .run(&SourceQuery::for_department("CUNDINAMARCA"), Granularity::YearMonth)
        .await
        .unwrap();

    assert_eq!(outcome.extraction.records, 6);
    assert_eq!(outcome.extraction.batches, 3);
    assert!(outcome.extraction.output.as_ref().is_some_and(|p| p.exists()));

    // The row without a timestamp is dropped; "14,5" is coerced.
    assert_eq!(outcome.processing.cleaning.dropped, 1);
    assert_eq!(outcome.processing.dataset.observations.len(), 5);
    let temperature = outcome
        .processing
        .dataset
        .observations
        .iter()
        .find(|o| o.observation.variable == Variable::AirTemperature)
        .unwrap();
    assert_eq!(temperature.observation.value, Some(14.5));

    let stats = outcome
        .summary
        .get("Bogotá D.C.", Variable::Precipitation, TimeBucket::YearMonth(2024, 1))
        .unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.mean, 10.0);
    assert!(outcome
        .summary
        .get("unknown", Variable::Precipitation, TimeBucket::YearMonth(2024, 1))
        .is_some());

    let processed = outcome.processing.output.as_ref().unwrap();
    let reread = ParquetWriter::new().read_observations(processed, 0).unwrap();
    assert_eq!(reread.len(), 5);
    assert!(outcome.summary_output.as_ref().is_some_and(|p| p.exists()));
}

#[tokio::test]
async fn test_process_is_idempotent_over_stored_files() {
    let dir = TempDir::new().unwrap();
    let pipeline =
        ClimatePipeline::new(MemorySource::new(source_rows()), settings_in(&dir, 4), region_index())
            .unwrap();
    let query = SourceQuery::for_department("CUNDINAMARCA");

    pipeline.extract(&query).await.unwrap();
    let once = pipeline.process(&pipeline.stored_raw_files().unwrap()).unwrap();

    pipeline.extract(&query).await.unwrap();
    let files = pipeline.stored_raw_files().unwrap();
    assert_eq!(files.len(), 2);
    let twice = pipeline.process(&files).unwrap();

    assert_eq!(
        once.dataset.observations.len(),
        twice.dataset.observations.len()
    );
    assert_eq!(twice.consolidation.duplicates(), 6);
}

/// Rejects each listed offset once, then serves from memory.
struct FailOnce {
    inner: MemorySource,
    failing: Mutex<HashSet<u64>>,
}

impl PageSource for FailOnce {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        offset: u64,
        limit: usize,
    ) -> Result<Page, PageError> {
        if self.failing.lock().unwrap().remove(&offset) {
            return Err(PageError::Client(400));
        }
        self.inner.fetch_page(query, offset, limit).await
    }
}

#[tokio::test]
async fn test_failed_extraction_keeps_prior_batches_and_resumes() {
    let dir = TempDir::new().unwrap();
    let source = FailOnce {
        inner: MemorySource::new(source_rows()),
        failing: Mutex::new(HashSet::from([4])),
    };
    let pipeline = ClimatePipeline::new(source, settings_in(&dir, 2), region_index()).unwrap();
    let query = SourceQuery::for_department("CUNDINAMARCA");

    let err = pipeline.extract(&query).await.unwrap_err();
    assert_eq!(err.resume_offset(), Some(4));

    let stored = pipeline.stored_raw_files().unwrap();
    assert_eq!(stored.len(), 1);
    let reader = RawFileReader::new(pipeline.settings().source.utc_offset().unwrap());
    let kept: usize = reader.read_files(&stored).unwrap().iter().map(Batch::len).sum();
    assert_eq!(kept, 4);

    let resumed = pipeline
        .extract_from(&query, FetchCheckpoint::at(4))
        .await
        .unwrap();
    assert_eq!(resumed.records, 2);
    assert_eq!(pipeline.stored_raw_files().unwrap().len(), 2);

    let outcome = pipeline.process(&pipeline.stored_raw_files().unwrap()).unwrap();
    assert_eq!(outcome.consolidation.output, 6);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let pipeline =
        ClimatePipeline::new(MemorySource::new(source_rows()), settings_in(&dir, 2), region_index())
            .unwrap();
    pipeline.cancellation_token().cancel();

    let err = pipeline
        .run(&SourceQuery::for_department("CUNDINAMARCA"), Granularity::Year)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { .. }));
    assert!(!dir.path().join("raw").exists());
    assert!(!dir.path().join("processed").exists());
}

#[tokio::test]
async fn test_renamed_value_column_is_rejected_before_storing() {
    let drifted: Vec<SourceRow> = source_rows()
        .into_iter()
        .map(|mut row| {
            if let Some(value) = row.remove("valorobservado") {
                row.insert("valor".to_string(), value);
            }
            row
        })
        .collect();
    let dir = TempDir::new().unwrap();
    let pipeline =
        ClimatePipeline::new(MemorySource::new(drifted), settings_in(&dir, 10), region_index())
            .unwrap();
    let query = SourceQuery::for_department("CUNDINAMARCA");

    match pipeline.extract(&query).await.unwrap_err() {
        PipelineError::SchemaMismatch { missing, .. } => {
            assert!(missing.iter().any(|field| field == "value"));
        }
        other => panic!("expected a schema mismatch, got {:?}", other),
    }
    assert!(!dir.path().join("raw").exists());

    let err = pipeline.run(&query, Granularity::Year).await.unwrap_err();
    assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    assert!(!dir.path().join("raw").exists());
    assert!(!dir.path().join("processed").exists());
}

#[tokio::test]
async fn test_list_stations_by_region() {
    let dir = TempDir::new().unwrap();
    let pipeline =
        ClimatePipeline::new(MemorySource::new(source_rows()), settings_in(&dir, 10), region_index())
            .unwrap();

    let all = pipeline
        .list_stations(&StationFilter::for_department("CUNDINAMARCA"))
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["BOG1", "NUL1"]);

    let in_bogota = pipeline
        .list_stations(&StationFilter::default().in_region("Bogotá D.C."))
        .await
        .unwrap();
    assert_eq!(in_bogota.len(), 1);
    assert_eq!(in_bogota[0].id, "BOG1");
}

#[test]
fn test_settings_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hydromet.toml");
    std::fs::write(
        &path,
        "[source]\npage_size = 1000\n\n[cleaning]\niqr_multiplier = 3.0\n",
    )
    .unwrap();

    let settings = Settings::load(Some(&path)).unwrap();
    assert_eq!(settings.source.page_size, 1000);
    assert_eq!(settings.variable_rules().iqr_multiplier, 3.0);
    assert_eq!(settings.source.department, "CUNDINAMARCA");
}
