use crate::models::Variable;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WarningKind {
    /// Raw value could not be read as a number; value nulled.
    CoercionFailed,
    /// Value outside the variable's plausible range; value nulled.
    OutOfRange,
}

/// Soft validation issue recorded for one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationWarning {
    pub station_id: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub variable: Variable,
    pub kind: WarningKind,
    pub details: String,
}

/// Per-run summary of the cleaning stage. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningReport {
    pub received: usize,
    pub dropped: usize,
    pub dropped_missing_timestamp: usize,
    pub dropped_missing_value: usize,
    pub flagged: usize,
    pub coercion_failures: usize,
    pub out_of_range: usize,
    pub retained: usize,
    /// Usable values with |z| > 3 within their station and variable; informational only.
    pub zscore_anomalies: usize,
    pub warnings: Vec<ValidationWarning>,
}

impl CleaningReport {
    fn percentage(&self, count: usize) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            100.0 * count as f64 / self.received as f64
        }
    }

    pub fn outlier_percentage(&self) -> f64 {
        self.percentage(self.flagged)
    }

    /// 100 minus 0.5 per percent of missing values and 1.0 per percent of
    /// out-of-range values, floored at zero.
    pub fn quality_score(&self) -> f64 {
        let missing = self.percentage(self.dropped + self.coercion_failures);
        let out_of_range = self.percentage(self.out_of_range);
        (100.0 - missing * 0.5 - out_of_range).max(0.0)
    }

    pub fn summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("=== Cleaning Report ===\n");
        summary.push_str(&format!("Records Received: {}\n", self.received));
        summary.push_str(&format!(
            "Records Dropped: {} ({:.1}%) [missing timestamp: {}, missing value: {}]\n",
            self.dropped,
            self.percentage(self.dropped),
            self.dropped_missing_timestamp,
            self.dropped_missing_value
        ));
        summary.push_str(&format!(
            "Records Flagged as Outliers: {} ({:.1}%)\n",
            self.flagged,
            self.outlier_percentage()
        ));
        summary.push_str(&format!("Coercion Failures: {}\n", self.coercion_failures));
        summary.push_str(&format!("Out of Range Values: {}\n", self.out_of_range));
        summary.push_str(&format!("Z-score Anomalies: {}\n", self.zscore_anomalies));
        summary.push_str(&format!("Records Retained: {}\n", self.retained));
        summary.push_str(&format!("Quality Score: {:.1}\n", self.quality_score()));

        if !self.warnings.is_empty() {
            summary.push_str("\nFirst 10 Warnings:\n");
            for (i, warning) in self.warnings.iter().take(10).enumerate() {
                summary.push_str(&format!(
                    "  {}. Station {} {} at {}: {}\n",
                    i + 1,
                    warning.station_id,
                    warning.variable,
                    warning
                        .timestamp
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    warning.details
                ));
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_score() {
        let report = CleaningReport {
            received: 100,
            dropped: 10,
            coercion_failures: 0,
            out_of_range: 5,
            retained: 90,
            ..Default::default()
        };
        assert!((report.quality_score() - 90.0).abs() < 1e-9);
        assert_eq!(CleaningReport::default().quality_score(), 100.0);
    }
}
