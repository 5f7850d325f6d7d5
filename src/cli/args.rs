use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hydromet-pipeline")]
#[command(about = "Hydrometeorological observation extraction, cleaning and trend analysis")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, global = true, help = "TOML configuration file")]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(short, long, help = "Department filter [default: from configuration]")]
    pub department: Option<String>,

    #[arg(long, help = "First observation date (YYYY-MM-DD)")]
    pub start_date: Option<NaiveDate>,

    #[arg(long, help = "Last observation date (YYYY-MM-DD)")]
    pub end_date: Option<NaiveDate>,

    #[arg(short, long, help = "Single station code")]
    pub station: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Page through the remote source and store raw batches
    Extract {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, default_value = "0", help = "Resume from this page offset")]
        from_offset: u64,
    },

    /// Consolidate, clean and attribute stored raw files
    Process {
        #[arg(help = "Raw CSV files [default: every file in the raw directory]")]
        raw_files: Vec<PathBuf>,

        #[arg(long, default_value = "snappy")]
        compression: String,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,

        #[arg(long, default_value = "1000")]
        chunk_size: usize,
    },

    /// Summarize a processed Parquet file by region, variable and period
    Analyze {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "year-month", help = "year or year-month")]
        granularity: String,

        #[arg(long, value_delimiter = ',', help = "Variables to include [default: all]")]
        variables: Vec<String>,

        #[arg(long, default_value = "false")]
        exclude_outliers: bool,

        #[arg(long, help = "Write the summary rows as JSON")]
        json: Option<PathBuf>,

        #[arg(long, default_value = "false", help = "Print dataset overview and file details")]
        details: bool,
    },

    /// List stations from the source catalogue
    Stations {
        #[arg(short, long)]
        department: Option<String>,

        #[arg(short, long)]
        municipality: Option<String>,

        #[arg(short, long)]
        region: Option<String>,

        #[arg(long, requires_all = ["lon", "radius_km"], allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, requires_all = ["lat", "radius_km"], allow_negative_numbers = true)]
        lon: Option<f64>,

        #[arg(long, requires_all = ["lat", "lon"])]
        radius_km: Option<f64>,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Extract, process everything stored and summarize in one go
    Run {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(short, long, default_value = "year-month")]
        granularity: String,

        #[arg(long, default_value = "snappy")]
        compression: String,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,
    },
}
