use crate::models::{
    AggregateStats, AttributedObservation, Granularity, TrendKey, TrendSummary, Variable,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryOptions {
    /// Leave values flagged `is_outlier` out of the aggregates.
    pub exclude_outliers: bool,
}

impl SummaryOptions {
    pub fn excluding_outliers() -> Self {
        Self {
            exclude_outliers: true,
        }
    }
}

/// Compensated (Neumaier) sum. Callers sort the input first so the result
/// does not depend on record order.
pub fn neumaier_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0f64;
    let mut compensation = 0.0f64;
    for &v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

/// Aggregates over an ascending, non-empty slice of finite values.
pub fn aggregate_sorted(sorted: &[f64]) -> Option<AggregateStats> {
    let (&min, &max) = (sorted.first()?, sorted.last()?);
    let count = sorted.len();
    let mean = neumaier_sum(sorted) / count as f64;

    let std_dev = if count < 2 {
        0.0
    } else {
        let squared: Vec<f64> = sorted.iter().map(|v| (v - mean).powi(2)).collect();
        (neumaier_sum(&squared) / (count - 1) as f64).sqrt()
    };

    Some(AggregateStats {
        count,
        mean,
        min,
        max,
        std_dev,
    })
}

/// Aggregates over values in any order.
pub fn aggregate(values: &[f64]) -> Option<AggregateStats> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    aggregate_sorted(&sorted)
}

pub(crate) fn include(observation: &AttributedObservation, options: &SummaryOptions) -> bool {
    let obs = &observation.observation;
    obs.has_usable_value() && !(options.exclude_outliers && obs.flags.is_outlier)
}

/// Groups observations by (region, variable, time bucket) and reduces each
/// group. An empty `variables` slice means every variable.
pub fn summarize(
    observations: &[AttributedObservation],
    granularity: Granularity,
    variables: &[Variable],
    options: &SummaryOptions,
) -> TrendSummary {
    let mut groups: BTreeMap<TrendKey, Vec<f64>> = BTreeMap::new();
    let mut skipped = 0usize;

    for attributed in observations {
        let obs = &attributed.observation;
        if !variables.is_empty() && !variables.contains(&obs.variable) {
            continue;
        }
        let (Some(timestamp), Some(value)) = (obs.timestamp, obs.value) else {
            skipped += 1;
            continue;
        };
        if !include(attributed, options) {
            skipped += 1;
            continue;
        }

        groups
            .entry(TrendKey {
                region: attributed.region.clone(),
                variable: obs.variable,
                bucket: granularity.bucket(&timestamp),
            })
            .or_default()
            .push(value);
    }

    let mut summary = TrendSummary::new(granularity);
    for (key, mut values) in groups {
        values.sort_by(f64::total_cmp);
        if let Some(stats) = aggregate_sorted(&values) {
            summary.groups.insert(key, stats);
        }
    }

    let used: usize = summary.groups.values().map(|stats| stats.count).sum();
    debug!("{} observations without a usable value left out", skipped);
    info!(
        "Summarized {} observations into {} groups ({:?})",
        used,
        summary.len(),
        granularity
    );
    summary
}
