use crate::error::{PipelineError, Result};
use crate::models::{
    AttributedObservation, Observation, QualityFlags, RegionName, TrendSummary, Variable,
};
use crate::utils::constants::*;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Parquet hand-off for attributed observations and trend summaries.
pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(PipelineError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    fn observation_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("station_id", DataType::Utf8, false),
            Field::new("timestamp", DataType::Utf8, true),
            Field::new("variable", DataType::Utf8, false),
            Field::new("raw_value", DataType::Utf8, true),
            Field::new("value", DataType::Float64, true),
            Field::new("unit", DataType::Utf8, false),
            Field::new("batch_id", DataType::Utf8, false),
            Field::new(
                "extracted_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("quality_flags", DataType::Utf8, false),
            Field::new("region", DataType::Utf8, false),
        ]))
    }

    fn observations_to_batch(
        records: &[AttributedObservation],
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let obs = || records.iter().map(|r| &r.observation);

        let station_ids: Vec<&str> = obs().map(|o| o.station_id.as_str()).collect();
        // RFC 3339 keeps the source offset.
        let timestamps: Vec<Option<String>> =
            obs().map(|o| o.timestamp.map(|t| t.to_rfc3339())).collect();
        let variables: Vec<&str> = obs().map(|o| o.variable.as_str()).collect();
        let raw_values: Vec<Option<&str>> = obs().map(|o| o.raw_value.as_deref()).collect();
        let values: Vec<Option<f64>> = obs().map(|o| o.value).collect();
        let units: Vec<&str> = obs().map(|o| o.unit.as_str()).collect();
        let batch_ids: Vec<&str> = obs().map(|o| o.batch_id.as_str()).collect();
        let extracted: Vec<i64> = obs().map(|o| o.extracted_at.timestamp_micros()).collect();
        let flags: Vec<String> = obs().map(|o| o.flags.as_code()).collect();
        let regions: Vec<&str> = records.iter().map(|r| r.region.as_str()).collect();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(station_ids)),
                Arc::new(StringArray::from(timestamps)),
                Arc::new(StringArray::from(variables)),
                Arc::new(StringArray::from(raw_values)),
                Arc::new(Float64Array::from(values)),
                Arc::new(StringArray::from(units)),
                Arc::new(StringArray::from(batch_ids)),
                Arc::new(TimestampMicrosecondArray::from(extracted).with_timezone("UTC")),
                Arc::new(StringArray::from(flags)),
                Arc::new(StringArray::from(regions)),
            ],
        )?;

        Ok(batch)
    }

    /// Write attributed observations, one record batch per row group.
    pub fn write_observations(&self, records: &[AttributedObservation], path: &Path) -> Result<()> {
        let schema = Self::observation_schema();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(self.properties()))?;

        for chunk in records.chunks(self.row_group_size) {
            let batch = Self::observations_to_batch(chunk, schema.clone())?;
            writer.write(&batch)?;
        }

        writer.close()?;
        info!("Wrote {} observations to {}", records.len(), path.display());
        Ok(())
    }

    /// Read attributed observations back; `limit` of 0 reads everything.
    pub fn read_observations(&self, path: &Path, limit: usize) -> Result<Vec<AttributedObservation>> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(self.row_group_size.min(8192))
            .build()?;

        let mut records = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;

            let station_ids = column::<StringArray>(&batch, "station_id")?;
            let timestamps = column::<StringArray>(&batch, "timestamp")?;
            let variables = column::<StringArray>(&batch, "variable")?;
            let raw_values = column::<StringArray>(&batch, "raw_value")?;
            let values = column::<Float64Array>(&batch, "value")?;
            let units = column::<StringArray>(&batch, "unit")?;
            let batch_ids = column::<StringArray>(&batch, "batch_id")?;
            let extracted = column::<TimestampMicrosecondArray>(&batch, "extracted_at")?;
            let flags = column::<StringArray>(&batch, "quality_flags")?;
            let regions = column::<StringArray>(&batch, "region")?;

            for i in 0..batch.num_rows() {
                if limit > 0 && records.len() >= limit {
                    return Ok(records);
                }

                let variable = Variable::parse(variables.value(i)).ok_or_else(|| {
                    PipelineError::InvalidFormat(format!(
                        "Unknown variable '{}' in {}",
                        variables.value(i),
                        path.display()
                    ))
                })?;
                let timestamp = if timestamps.is_null(i) {
                    None
                } else {
                    Some(DateTime::parse_from_rfc3339(timestamps.value(i))?)
                };
                let extracted_at = DateTime::<Utc>::from_timestamp_micros(extracted.value(i))
                    .ok_or_else(|| {
                        PipelineError::InvalidFormat("Invalid extraction timestamp".to_string())
                    })?;

                let mut observation = Observation::new(
                    station_ids.value(i),
                    timestamp,
                    variable,
                    (!raw_values.is_null(i)).then(|| raw_values.value(i).to_string()),
                    batch_ids.value(i),
                    extracted_at,
                )
                .with_unit(units.value(i));
                observation.value = (!values.is_null(i)).then(|| values.value(i));
                observation.flags = QualityFlags::from_code(flags.value(i));

                records.push(AttributedObservation {
                    observation,
                    region: RegionName::parse(regions.value(i)),
                });
            }
        }

        Ok(records)
    }

    /// Write the flat rows of a trend summary.
    pub fn write_trend_summary(&self, summary: &TrendSummary, path: &Path) -> Result<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DataType::Utf8, false),
            Field::new("variable", DataType::Utf8, false),
            Field::new("bucket", DataType::Utf8, false),
            Field::new("count", DataType::UInt64, false),
            Field::new("mean", DataType::Float64, false),
            Field::new("min", DataType::Float64, false),
            Field::new("max", DataType::Float64, false),
            Field::new("std_dev", DataType::Float64, false),
        ]));

        let rows = summary.rows();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.region.as_str()))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.variable.as_str()))),
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.bucket.as_str()))),
                Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.count as u64))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.mean))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.min))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.max))),
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.std_dev))),
            ],
        )?;

        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(self.properties()))?;
        writer.write(&batch)?;
        writer.close()?;

        info!("Wrote {} summary rows to {}", rows.len(), path.display());
        Ok(())
    }

    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let row_group_sizes: Vec<i64> = (0..metadata.num_row_groups())
            .map(|i| metadata.row_group(i).num_rows())
            .collect();

        Ok(ParquetFileInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: row_group_sizes.len(),
            row_group_sizes,
            file_size: std::fs::metadata(path)?.len(),
            compression: self.compression,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| PipelineError::InvalidFormat(format!("Invalid or missing {} column", name)))
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: usize,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg = if self.row_groups == 0 {
            0.0
        } else {
            self.total_rows as f64 / self.row_groups as f64
        };
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
            avg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{summarize, SummaryOptions};
    use crate::models::Granularity;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn sample() -> Vec<AttributedObservation> {
        let extracted = Utc.with_ymd_and_hms(2024, 2, 1, 10, 30, 0).unwrap();
        let mut hot = Observation::new(
            "21205580",
            Some(DateTime::parse_from_rfc3339("2024-01-15T14:00:00-05:00").unwrap()),
            Variable::AirTemperature,
            Some("85.0".to_string()),
            "run-000000000000",
            extracted,
        );
        hot.flags.out_of_range = true;
        hot.flags.is_outlier = true;

        let mut rain = Observation::new(
            "21205580",
            Some(DateTime::parse_from_rfc3339("2024-01-15T15:00:00-05:00").unwrap()),
            Variable::Precipitation,
            Some("0,4".to_string()),
            "run-000000000000",
            extracted,
        );
        rain.value = Some(0.4);

        vec![
            AttributedObservation {
                observation: hot,
                region: RegionName::Named("Bogotá D.C.".to_string()),
            },
            AttributedObservation {
                observation: rain,
                region: RegionName::Unknown,
            },
        ]
    }

    #[test]
    fn test_observations_read_back() -> Result<()> {
        let writer = ParquetWriter::new();
        let temp_file = NamedTempFile::new()?;
        let records = sample();

        writer.write_observations(&records, temp_file.path())?;
        let read = writer.read_observations(temp_file.path(), 0)?;

        assert_eq!(read, records);
        assert_eq!(read[0].observation.timestamp.unwrap().offset().local_minus_utc(), -5 * 3600);
        assert_eq!(writer.read_observations(temp_file.path(), 1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_write_empty_records() -> Result<()> {
        let writer = ParquetWriter::new();
        let temp_file = NamedTempFile::new()?;
        writer.write_observations(&[], temp_file.path())?;
        assert_eq!(writer.get_file_info(temp_file.path())?.total_rows, 0);
        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        for compression in ["snappy", "gzip", "lz4", "zstd", "none"] {
            let writer = ParquetWriter::new().with_compression(compression)?;
            let temp_file = NamedTempFile::new()?;
            let result = writer.write_observations(&sample(), temp_file.path());
            assert!(result.is_ok(), "Failed with compression: {}", compression);
        }
        assert!(ParquetWriter::new().with_compression("brotli9").is_err());
        Ok(())
    }

    #[test]
    fn test_row_groups_and_summary_rows() -> Result<()> {
        let writer = ParquetWriter::new().with_row_group_size(1);
        let temp_file = NamedTempFile::new()?;
        writer.write_observations(&sample(), temp_file.path())?;
        let info = writer.get_file_info(temp_file.path())?;
        assert_eq!(info.total_rows, 2);
        assert_eq!(info.row_groups, 2);

        let summary = summarize(&sample(), Granularity::YearMonth, &[], &SummaryOptions::default());
        let summary_file = NamedTempFile::new()?;
        writer.write_trend_summary(&summary, summary_file.path())?;
        assert_eq!(writer.get_file_info(summary_file.path())?.total_rows, 1);
        Ok(())
    }
}
