use crate::error::PipelineError;
use crate::models::{RegionName, Variable};
use chrono::{DateTime, Datelike, FixedOffset};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Granularity {
    Year,
    YearMonth,
}

impl Granularity {
    pub fn bucket(&self, timestamp: &DateTime<FixedOffset>) -> TimeBucket {
        match self {
            Granularity::Year => TimeBucket::Year(timestamp.year()),
            Granularity::YearMonth => TimeBucket::YearMonth(timestamp.year(), timestamp.month()),
        }
    }
}

impl FromStr for Granularity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "year" | "yearly" | "annual" => Ok(Granularity::Year),
            "year-month" | "year_month" | "month" | "monthly" => Ok(Granularity::YearMonth),
            other => Err(PipelineError::Config(format!(
                "Unsupported granularity: {}",
                other
            ))),
        }
    }
}

/// Grouping key derived from a timestamp at a chosen granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeBucket {
    Year(i32),
    YearMonth(i32, u32),
}

impl TimeBucket {
    pub fn year(&self) -> i32 {
        match self {
            TimeBucket::Year(y) | TimeBucket::YearMonth(y, _) => *y,
        }
    }

    pub fn month(&self) -> Option<u32> {
        match self {
            TimeBucket::Year(_) => None,
            TimeBucket::YearMonth(_, m) => Some(*m),
        }
    }

    /// Position of the bucket on a uniform time axis (years or months since year 0).
    pub fn ordinal(&self) -> f64 {
        match self {
            TimeBucket::Year(y) => *y as f64,
            TimeBucket::YearMonth(y, m) => (*y as f64) * 12.0 + (*m as f64 - 1.0),
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBucket::Year(y) => write!(f, "{:04}", y),
            TimeBucket::YearMonth(y, m) => write!(f, "{:04}-{:02}", y, m),
        }
    }
}

impl Serialize for TimeBucket {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrendKey {
    pub region: RegionName,
    pub variable: Variable,
    pub bucket: TimeBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; zero for single-value groups.
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub granularity: Granularity,
    pub groups: BTreeMap<TrendKey, AggregateStats>,
}

impl TrendSummary {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            groups: BTreeMap::new(),
        }
    }

    pub fn get(&self, region: &str, variable: Variable, bucket: TimeBucket) -> Option<&AggregateStats> {
        self.groups.get(&TrendKey {
            region: RegionName::parse(region),
            variable,
            bucket,
        })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Bucket series per (region, variable), in bucket order.
    pub fn series(&self) -> BTreeMap<(RegionName, Variable), Vec<(TimeBucket, AggregateStats)>> {
        let mut series: BTreeMap<(RegionName, Variable), Vec<(TimeBucket, AggregateStats)>> =
            BTreeMap::new();
        for (key, stats) in &self.groups {
            series
                .entry((key.region.clone(), key.variable))
                .or_default()
                .push((key.bucket, *stats));
        }
        series
    }

    /// Flat rows for the API layer and storage.
    pub fn rows(&self) -> Vec<TrendRow> {
        self.groups
            .iter()
            .map(|(key, stats)| TrendRow {
                region: key.region.to_string(),
                variable: key.variable,
                bucket: key.bucket.to_string(),
                count: stats.count,
                mean: stats.mean,
                min: stats.min,
                max: stats.max,
                std_dev: stats.std_dev,
            })
            .collect()
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(&self.rows())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub region: String,
    pub variable: Variable,
    pub bucket: String,
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}
