use crate::models::{
    CleaningReport, Dataset, Observation, QualityFlags, ValidationWarning, Variable, WarningKind,
};
use crate::processors::outliers::{zscore_flags, IqrBounds};
use crate::processors::parallel_processor::ShardedExecutor;
use crate::utils::constants::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Validation rule for one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableRule {
    pub min: f64,
    pub max: f64,
    /// Records without a value are dropped when set; otherwise kept with a null value.
    pub required: bool,
}

impl VariableRule {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableRules {
    rules: BTreeMap<Variable, VariableRule>,
    pub iqr_multiplier: f64,
    pub min_group_size: usize,
}

impl Default for VariableRules {
    fn default() -> Self {
        let rules = [
            (Variable::AirTemperature, AIR_TEMPERATURE_RANGE),
            (Variable::Precipitation, PRECIPITATION_RANGE),
            (Variable::Humidity, HUMIDITY_RANGE),
            (Variable::Pressure, PRESSURE_RANGE),
        ]
        .into_iter()
        .map(|(variable, (min, max))| (variable, VariableRule::new(min, max)))
        .collect();

        Self {
            rules,
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
        }
    }
}

impl VariableRules {
    pub fn with_rule(mut self, variable: Variable, rule: VariableRule) -> Self {
        self.rules.insert(variable, rule);
        self
    }

    pub fn with_iqr_multiplier(mut self, k: f64) -> Self {
        self.iqr_multiplier = k;
        self
    }

    pub fn with_min_group_size(mut self, size: usize) -> Self {
        self.min_group_size = size.max(1);
        self
    }

    pub fn rule(&self, variable: Variable) -> Option<&VariableRule> {
        self.rules.get(&variable)
    }

    fn requires_value(&self, variable: Variable) -> bool {
        self.rule(variable).map_or(true, |r| r.required)
    }
}

/// Parse a source value; a comma is accepted as decimal separator.
pub fn coerce_value(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropReason {
    MissingTimestamp,
    MissingValue,
}

enum Outcome {
    Dropped(DropReason),
    Kept {
        observation: Observation,
        /// Parsed number, kept for outlier fences even when the value was nulled.
        coerced: Option<f64>,
        warning: Option<ValidationWarning>,
    },
}

/// Validates, coerces and flags observations. The same input and rules
/// always give the same output.
pub struct Cleaner {
    rules: VariableRules,
    executor: Option<ShardedExecutor>,
}

impl Cleaner {
    pub fn new(rules: VariableRules) -> Self {
        Self {
            rules,
            executor: None,
        }
    }

    /// Shard the per-record pass across a worker pool.
    pub fn with_executor(mut self, executor: ShardedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn rules(&self) -> &VariableRules {
        &self.rules
    }

    pub fn clean(&self, dataset: &Dataset) -> (Dataset, CleaningReport) {
        let outcomes: Vec<Outcome> = match &self.executor {
            Some(executor) => executor.map(&dataset.observations, |obs| self.check_record(obs)),
            None => dataset
                .observations
                .iter()
                .map(|obs| self.check_record(obs))
                .collect(),
        };

        let mut report = CleaningReport {
            received: dataset.len(),
            ..Default::default()
        };
        let mut observations = Vec::with_capacity(outcomes.len());
        let mut coerced_values = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            match outcome {
                Outcome::Dropped(reason) => {
                    report.dropped += 1;
                    match reason {
                        DropReason::MissingTimestamp => report.dropped_missing_timestamp += 1,
                        DropReason::MissingValue => report.dropped_missing_value += 1,
                    }
                }
                Outcome::Kept {
                    observation,
                    coerced,
                    warning,
                } => {
                    if let Some(warning) = warning {
                        match warning.kind {
                            WarningKind::CoercionFailed => report.coercion_failures += 1,
                            WarningKind::OutOfRange => report.out_of_range += 1,
                        }
                        report.warnings.push(warning);
                    }
                    observations.push(observation);
                    coerced_values.push(coerced);
                }
            }
        }

        self.flag_outliers(&mut observations, &coerced_values);
        report.zscore_anomalies = count_zscore_anomalies(&observations);
        report.flagged = observations.iter().filter(|o| o.flags.is_outlier).count();
        report.retained = observations.len();

        if !report.warnings.is_empty() {
            warn!(
                "{} validation warnings ({} coercion failures, {} out of range)",
                report.warnings.len(),
                report.coercion_failures,
                report.out_of_range
            );
        }
        info!(
            "Cleaned {} records: {} dropped, {} flagged as outliers, {} retained",
            report.received, report.dropped, report.flagged, report.retained
        );

        (
            Dataset {
                observations,
                stations: dataset.stations.clone(),
            },
            report,
        )
    }

    /// Presence, coercion and range checks for one record. Flags are
    /// recomputed from the raw value every time.
    fn check_record(&self, obs: &Observation) -> Outcome {
        let Some(timestamp) = obs.timestamp else {
            return Outcome::Dropped(DropReason::MissingTimestamp);
        };

        let raw = obs.raw_value.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let mut observation = obs.clone();
        observation.flags = QualityFlags::default();
        observation.value = None;

        let Some(raw) = raw else {
            if self.rules.requires_value(obs.variable) {
                return Outcome::Dropped(DropReason::MissingValue);
            }
            return Outcome::Kept {
                observation,
                coerced: None,
                warning: None,
            };
        };

        let warning = |kind: WarningKind, details: String| ValidationWarning {
            station_id: obs.station_id.clone(),
            timestamp: Some(timestamp),
            variable: obs.variable,
            kind,
            details,
        };

        let Some(value) = coerce_value(raw) else {
            observation.flags.coercion_failed = true;
            return Outcome::Kept {
                observation,
                coerced: None,
                warning: Some(warning(
                    WarningKind::CoercionFailed,
                    format!("'{}' is not a number", raw),
                )),
            };
        };

        if let Some(rule) = self.rules.rule(obs.variable) {
            if !rule.contains(value) {
                observation.flags.out_of_range = true;
                return Outcome::Kept {
                    observation,
                    coerced: Some(value),
                    warning: Some(warning(
                        WarningKind::OutOfRange,
                        format!(
                            "{} {} outside [{}, {}]",
                            value, obs.unit, rule.min, rule.max
                        ),
                    )),
                };
            }
        }

        observation.value = Some(value);
        Outcome::Kept {
            observation,
            coerced: Some(value),
            warning: None,
        }
    }

    /// IQR flags per (station, variable, month). Fences come from the
    /// group's in-range values; any parsed value outside them is flagged.
    fn flag_outliers(&self, observations: &mut [Observation], coerced: &[Option<f64>]) {
        let mut groups: BTreeMap<(&str, Variable, u32), Vec<usize>> = BTreeMap::new();
        for (i, obs) in observations.iter().enumerate() {
            if let (Some(_), Some(month)) = (coerced[i], obs.month()) {
                groups
                    .entry((obs.station_id.as_str(), obs.variable, month))
                    .or_default()
                    .push(i);
            }
        }

        let k = self.rules.iqr_multiplier;
        let mut flagged = Vec::new();
        for ((station, variable, month), indices) in &groups {
            let in_range: Vec<f64> = indices
                .iter()
                .filter_map(|&i| observations[i].value)
                .collect();

            if in_range.len() < self.rules.min_group_size {
                continue;
            }
            let Some(bounds) = IqrBounds::from_values(&in_range, k) else {
                continue;
            };

            let before = flagged.len();
            flagged.extend(
                indices
                    .iter()
                    .copied()
                    .filter(|&i| coerced[i].is_some_and(|v| !bounds.contains(v))),
            );
            if flagged.len() > before {
                debug!(
                    "Station {} {} month {}: {} outliers outside [{:.2}, {:.2}]",
                    station,
                    variable,
                    month,
                    flagged.len() - before,
                    bounds.lower,
                    bounds.upper
                );
            }
        }

        for i in flagged {
            observations[i].flags.is_outlier = true;
        }
    }
}

fn count_zscore_anomalies(observations: &[Observation]) -> usize {
    let mut series: BTreeMap<(&str, Variable), Vec<f64>> = BTreeMap::new();
    for obs in observations {
        if let Some(value) = obs.value {
            series
                .entry((obs.station_id.as_str(), obs.variable))
                .or_default()
                .push(value);
        }
    }

    series
        .values()
        .map(|values| {
            zscore_flags(values, ZSCORE_THRESHOLD)
                .into_iter()
                .filter(|f| *f)
                .count()
        })
        .sum()
}

/// Clean `dataset` with `rules` on the calling thread.
pub fn clean(dataset: &Dataset, rules: &VariableRules) -> (Dataset, CleaningReport) {
    Cleaner::new(rules.clone()).clean(dataset)
}
