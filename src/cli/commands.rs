use crate::analyzers::{seasonal_profiles, summarize, trend_tests, DatasetOverview, SummaryOptions};
use crate::cli::args::{Cli, Commands, QueryArgs};
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::models::{Granularity, SourceQuery, TrendSummary, Variable};
use crate::pipeline::{ClimatePipeline, StationFilter};
use crate::processors::ShardedExecutor;
use crate::readers::{FetchCheckpoint, SocrataClient};
use crate::utils::logging;
use crate::utils::progress::ProgressReporter;
use crate::writers::ParquetWriter;
use std::path::Path;
use tracing::Level;

fn source_query(args: QueryArgs, settings: &Settings) -> SourceQuery {
    let department = args
        .department
        .or_else(|| Some(settings.source.department.clone()))
        .filter(|d| !d.trim().is_empty());

    SourceQuery {
        department,
        start_date: args.start_date,
        end_date: args.end_date,
        station_code: args.station,
    }
}

fn parse_variables(names: &[String]) -> Result<Vec<Variable>> {
    names
        .iter()
        .map(|name| {
            Variable::parse(name)
                .ok_or_else(|| PipelineError::Config(format!("Unknown variable: {}", name)))
        })
        .collect()
}

fn pipeline(
    settings: &Settings,
    compression: &str,
    executor: ShardedExecutor,
) -> Result<ClimatePipeline<SocrataClient>> {
    let writer = ParquetWriter::new().with_compression(compression)?;
    Ok(ClimatePipeline::from_settings(settings.clone())?
        .with_executor(executor)
        .with_parquet_writer(writer))
}

fn cancel_on_ctrl_c(pipeline: &ClimatePipeline<SocrataClient>) {
    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling at the next stage boundary...");
            token.cancel();
        }
    });
}

fn print_trends(summary: &TrendSummary) {
    println!("\nTrend Summary ({:?}, {} groups):", summary.granularity, summary.len());
    for row in summary.rows().iter().take(20) {
        println!(
            "  {} {} {}: n={} mean={:.2} min={:.2} max={:.2} sd={:.2}",
            row.region, row.variable, row.bucket, row.count, row.mean, row.min, row.max, row.std_dev
        );
    }
    if summary.len() > 20 {
        println!("  ... {} more", summary.len() - 20);
    }

    let tests = trend_tests(summary);
    if !tests.is_empty() {
        println!("\nTrend Tests:");
        for test in &tests {
            println!(
                "  {} {}: {} ({} buckets, slope {:.4}/bucket, r²={:.2}, MK z={:.2})",
                test.region,
                test.variable,
                test.mann_kendall.direction,
                test.buckets,
                test.linear.slope,
                test.linear.r_squared,
                test.mann_kendall.z
            );
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        logging::parse_level(&settings.log.level)?
    };
    let log_file = cli.log_file.as_deref().or(settings.log.file.as_deref());
    logging::init(level, log_file)?;

    match cli.command {
        Commands::Extract { query, from_offset } => {
            let query = source_query(query, &settings);
            println!("Extracting observations...");
            println!("Source: {}/resource/{}.json", settings.source.host, settings.source.dataset_id);

            let pipeline = ClimatePipeline::from_settings(settings.clone())?;
            cancel_on_ctrl_c(&pipeline);
            let progress = ProgressReporter::new_spinner("Fetching pages...", false);

            match pipeline.extract_from(&query, FetchCheckpoint::at(from_offset)).await {
                Ok(summary) => {
                    progress.finish_with_message(&format!("Fetched {} records", summary.records));
                    println!("\n{}", summary.summary());
                }
                Err(e) => {
                    progress.finish_with_message("Extraction failed");
                    if let Some(offset) = e.resume_offset() {
                        eprintln!("Resume with: extract --from-offset {}", offset);
                    }
                    return Err(e);
                }
            }
        }

        Commands::Process {
            raw_files,
            compression,
            max_workers,
            chunk_size,
        } => {
            let executor = ShardedExecutor::new(max_workers)?.with_chunk_size(chunk_size);
            let pipeline = pipeline(&settings, &compression, executor)?;

            let files = if raw_files.is_empty() {
                pipeline.stored_raw_files()?
            } else {
                raw_files
            };
            if files.is_empty() {
                println!("No raw files to process");
                return Ok(());
            }

            println!("Processing {} raw files...", files.len());
            println!("Workers: {}, Chunk size: {}", max_workers, chunk_size);
            let progress = ProgressReporter::new_spinner("Consolidating and cleaning...", false);
            let outcome = pipeline.process(&files)?;
            progress.finish_with_message(&format!(
                "Processed {} observations",
                outcome.dataset.observations.len()
            ));

            println!(
                "\nConsolidation: {} incoming, {} duplicates, {} in dataset",
                outcome.consolidation.incoming,
                outcome.consolidation.duplicates(),
                outcome.consolidation.output
            );
            println!("\n{}", outcome.cleaning.summary());
            println!("\n{}", outcome.dataset.report.summary());

            if let Some(path) = &outcome.output {
                let info = ParquetWriter::new().get_file_info(path)?;
                println!("\nOutput: {}\n{}", path.display(), info.summary());
            }
            println!("Processing complete!");
        }

        Commands::Analyze {
            file,
            granularity,
            variables,
            exclude_outliers,
            json,
            details,
        } => {
            let granularity: Granularity = granularity.parse()?;
            let variables = parse_variables(&variables)?;
            let options = SummaryOptions { exclude_outliers };

            println!("Analyzing Parquet file: {}", file.display());
            let writer = ParquetWriter::new();
            let observations = writer.read_observations(&file, 0)?;
            let summary = summarize(&observations, granularity, &variables, &options);

            if details {
                let overview = DatasetOverview::compute(&observations, &[])?;
                println!("\n{}", overview.detailed_summary());
                println!("\nFile Details:\n{}", writer.get_file_info(&file)?.summary());

                for profile in seasonal_profiles(&observations, &options) {
                    println!(
                        "Seasonality {} {}: peak month {}, lowest month {}, amplitude {:.2}",
                        profile.region,
                        profile.variable,
                        profile.peak_month,
                        profile.lowest_month,
                        profile.amplitude
                    );
                }
            }

            print_trends(&summary);

            if let Some(path) = json {
                write_json(&summary, &path)?;
                println!("\nSummary written to {}", path.display());
            }
        }

        Commands::Stations {
            department,
            municipality,
            region,
            lat,
            lon,
            radius_km,
            limit,
        } => {
            let mut filter = StationFilter {
                department: department.or_else(|| Some(settings.source.department.clone())),
                municipality,
                region,
                near: None,
                limit,
            };
            if let (Some(lat), Some(lon), Some(radius)) = (lat, lon, radius_km) {
                filter = filter.within(lat, lon, radius);
            }

            let pipeline = ClimatePipeline::from_settings(settings.clone())?;
            let stations = pipeline.list_stations(&filter).await?;

            println!("Found {} stations:", stations.len());
            for (i, station) in stations.iter().enumerate() {
                let location = station
                    .location()
                    .map(|(lat, lon)| format!("{:.4}, {:.4}", lat, lon))
                    .unwrap_or_else(|| "unlocated".to_string());
                println!(
                    "{}. {} {} [{}] ({}) region: {}",
                    i + 1,
                    station.id,
                    station.name,
                    station.municipality.as_deref().unwrap_or("-"),
                    location,
                    station.region.as_deref().unwrap_or("unknown")
                );
            }
        }

        Commands::Run {
            query,
            granularity,
            compression,
            max_workers,
        } => {
            let granularity: Granularity = granularity.parse()?;
            let query = source_query(query, &settings);
            let pipeline = pipeline(&settings, &compression, ShardedExecutor::new(max_workers)?)?;
            cancel_on_ctrl_c(&pipeline);

            let progress = ProgressReporter::new_spinner("Running pipeline...", false);
            let outcome = pipeline.run(&query, granularity).await;
            progress.finish_with_message("Pipeline finished");
            let outcome = outcome?;

            println!("\n{}", outcome.extraction.summary());
            println!("\n{}", outcome.processing.cleaning.summary());
            println!("\n{}", outcome.processing.dataset.report.summary());
            print_trends(&outcome.summary);

            if let Some(path) = &outcome.summary_output {
                println!("\nSummary written to {}", path.display());
            }
        }
    }

    Ok(())
}

fn write_json(summary: &TrendSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, summary.to_json()?)?;
    Ok(())
}
