use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    AirTemperature,
    Precipitation,
    Humidity,
    Pressure,
}

impl Variable {
    pub const ALL: [Variable; 4] = [
        Variable::AirTemperature,
        Variable::Precipitation,
        Variable::Humidity,
        Variable::Pressure,
    ];

    /// Parse either a canonical name (`air_temperature`) or a source sensor
    /// description such as "Temperatura Aire 2 m" or "Precipitación".
    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "air_temperature" | "temperature" => return Some(Variable::AirTemperature),
            "precipitation" => return Some(Variable::Precipitation),
            "humidity" => return Some(Variable::Humidity),
            "pressure" => return Some(Variable::Pressure),
            _ => {}
        }

        if lowered.contains("temperatura") || lowered.contains("temperature") {
            Some(Variable::AirTemperature)
        } else if lowered.contains("precipitaci") {
            Some(Variable::Precipitation)
        } else if lowered.contains("humedad") || lowered.contains("humidity") {
            Some(Variable::Humidity)
        } else if lowered.contains("presi") || lowered.contains("pressure") {
            Some(Variable::Pressure)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::AirTemperature => "air_temperature",
            Variable::Precipitation => "precipitation",
            Variable::Humidity => "humidity",
            Variable::Pressure => "pressure",
        }
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            Variable::AirTemperature => "°C",
            Variable::Precipitation => "mm",
            Variable::Humidity => "%",
            Variable::Pressure => "hPa",
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub coercion_failed: bool,
    pub out_of_range: bool,
    pub is_outlier: bool,
}

impl QualityFlags {
    pub fn is_clean(&self) -> bool {
        !self.coercion_failed && !self.out_of_range && !self.is_outlier
    }

    /// Compact form used in stored files, e.g. "C-O" for coercion failure plus outlier.
    pub fn as_code(&self) -> String {
        format!(
            "{}{}{}",
            if self.coercion_failed { 'C' } else { '-' },
            if self.out_of_range { 'R' } else { '-' },
            if self.is_outlier { 'O' } else { '-' }
        )
    }

    pub fn from_code(code: &str) -> Self {
        Self {
            coercion_failed: code.contains('C'),
            out_of_range: code.contains('R'),
            is_outlier: code.contains('O'),
        }
    }
}

/// Uniqueness key of an observation after consolidation.
pub type MergeKey = (String, Option<DateTime<FixedOffset>>, Variable);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub variable: Variable,
    /// Value exactly as received from the source.
    pub raw_value: Option<String>,
    /// Numeric value, filled by the cleaner.
    pub value: Option<f64>,
    pub unit: String,
    pub batch_id: String,
    pub extracted_at: DateTime<Utc>,
    pub flags: QualityFlags,
}

impl Observation {
    pub fn new(
        station_id: impl Into<String>,
        timestamp: Option<DateTime<FixedOffset>>,
        variable: Variable,
        raw_value: Option<String>,
        batch_id: impl Into<String>,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            timestamp,
            variable,
            raw_value,
            value: None,
            unit: variable.default_unit().to_string(),
            batch_id: batch_id.into(),
            extracted_at,
            flags: QualityFlags::default(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn merge_key(&self) -> MergeKey {
        (self.station_id.clone(), self.timestamp, self.variable)
    }

    /// Month (1-12) in the source time zone.
    pub fn month(&self) -> Option<u32> {
        self.timestamp.map(|ts| ts.month())
    }

    pub fn has_usable_value(&self) -> bool {
        self.value.is_some_and(f64::is_finite)
    }
}
