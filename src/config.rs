use crate::error::{PipelineError, Result};
use crate::models::Variable;
use crate::processors::cleaner::{VariableRule, VariableRules};
use crate::readers::fetcher::FetcherConfig;
use crate::utils::backoff::BackoffPolicy;
use crate::utils::constants::*;
use chrono::FixedOffset;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

pub const ENV_PREFIX: &str = "HYDROMET";
pub const ENV_SEPARATOR: &str = "__";

/// Remote source connection and paging.
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SourceSettings {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(length(min = 1))]
    pub dataset_id: String,

    pub department: String,

    /// Quota identification token; only ever supplied through configuration.
    pub app_token: Option<String>,

    #[validate(range(min = 1))]
    pub page_size: usize,

    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,

    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    #[validate(range(min = -12, max = 14))]
    pub utc_offset_hours: i32,
}

impl fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSettings")
            .field("host", &self.host)
            .field("dataset_id", &self.dataset_id)
            .field("department", &self.department)
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("page_size", &self.page_size)
            .field("concurrency", &self.concurrency)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("utc_offset_hours", &self.utc_offset_hours)
            .finish()
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_SOURCE_HOST.to_string(),
            dataset_id: DEFAULT_DATASET_ID.to_string(),
            department: DEFAULT_DEPARTMENT.to_string(),
            app_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            utc_offset_hours: DEFAULT_SOURCE_UTC_OFFSET_HOURS,
        }
    }
}

impl SourceSettings {
    /// Offset applied to source timestamps that carry none.
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            PipelineError::Config(format!("Invalid UTC offset: {}h", self.utc_offset_hours))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BackoffSettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
    #[validate(range(min = 1.0))]
    pub rate_limit_multiplier: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let policy = BackoffPolicy::with_max_retries(DEFAULT_MAX_RETRIES);
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
            rate_limit_multiplier: policy.rate_limit_multiplier,
        }
    }
}

impl BackoffSettings {
    pub fn to_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            multiplier: self.multiplier,
            jitter: self.jitter,
            rate_limit_multiplier: self.rate_limit_multiplier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSetting {
    pub min: f64,
    pub max: f64,
    /// Drop records of this variable that have no value.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl From<(f64, f64)> for RangeSetting {
    fn from((min, max): (f64, f64)) -> Self {
        Self {
            min,
            max,
            required: true,
        }
    }
}

fn validate_range(range: &RangeSetting) -> std::result::Result<(), ValidationError> {
    if range.min.is_finite() && range.max.is_finite() && range.min <= range.max {
        Ok(())
    } else {
        Err(ValidationError::new("range_bounds"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CleaningSettings {
    #[validate(range(exclusive_min = 0.0))]
    pub iqr_multiplier: f64,

    #[validate(range(min = 1))]
    pub min_group_size: usize,

    #[validate(custom(function = "validate_range"))]
    pub air_temperature: RangeSetting,

    #[validate(custom(function = "validate_range"))]
    pub precipitation: RangeSetting,

    #[validate(custom(function = "validate_range"))]
    pub humidity: RangeSetting,

    #[validate(custom(function = "validate_range"))]
    pub pressure: RangeSetting,
}

impl Default for CleaningSettings {
    fn default() -> Self {
        Self {
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
            air_temperature: AIR_TEMPERATURE_RANGE.into(),
            precipitation: PRECIPITATION_RANGE.into(),
            humidity: HUMIDITY_RANGE.into(),
            pressure: PRESSURE_RANGE.into(),
        }
    }
}

impl CleaningSettings {
    pub fn to_rules(&self) -> VariableRules {
        let mut rules = VariableRules::default()
            .with_iqr_multiplier(self.iqr_multiplier)
            .with_min_group_size(self.min_group_size);

        for (variable, range) in [
            (Variable::AirTemperature, self.air_temperature),
            (Variable::Precipitation, self.precipitation),
            (Variable::Humidity, self.humidity),
            (Variable::Pressure, self.pressure),
        ] {
            let rule = VariableRule::new(range.min, range.max);
            let rule = if range.required { rule } else { rule.optional() };
            rules = rules.with_rule(variable, rule);
        }

        rules
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialSettings {
    /// GeoJSON FeatureCollection with department boundaries.
    pub regions_file: Option<PathBuf>,
    pub name_property: String,
    pub code_property: Option<String>,
}

impl Default for SpatialSettings {
    fn default() -> Self {
        Self {
            regions_file: None,
            name_property: "name".to_string(),
            code_property: Some("code".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from(DEFAULT_RAW_DATA_DIR),
            processed_dir: PathBuf::from(DEFAULT_PROCESSED_DATA_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub source: SourceSettings,
    #[validate(nested)]
    pub backoff: BackoffSettings,
    #[validate(nested)]
    pub cleaning: CleaningSettings,
    pub spatial: SpatialSettings,
    pub paths: PathSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Layer built-in defaults, an optional TOML file and `HYDROMET__*`
    /// environment variables, then validate the result.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(PipelineError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn fetcher_config(&self) -> Result<FetcherConfig> {
        Ok(FetcherConfig {
            page_size: self.source.page_size,
            concurrency: self.source.concurrency,
            request_timeout: self.source.request_timeout(),
            backoff: self.backoff.to_policy(),
            utc_offset: self.source.utc_offset()?,
        })
    }

    pub fn variable_rules(&self) -> VariableRules {
        self.cleaning.to_rules()
    }
}
