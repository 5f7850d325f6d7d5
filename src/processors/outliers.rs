//! Pure outlier statistics over immutable value slices.

use serde::Serialize;

/// Quantile of an ascending slice using linear interpolation between
/// closest ranks (`(n - 1) * q` positioning).
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }

    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Tukey fences `[Q1 - k·IQR, Q3 + k·IQR]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IqrBounds {
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

impl IqrBounds {
    pub fn from_values(values: &[f64], k: f64) -> Option<Self> {
        let sorted = sorted_finite(values);
        let q1 = quantile(&sorted, 0.25)?;
        let q3 = quantile(&sorted, 0.75)?;
        let iqr = q3 - q1;

        Some(Self {
            q1,
            q3,
            lower: q1 - k * iqr,
            upper: q3 + k * iqr,
        })
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }

    /// Boundary values are inside.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Per-value IQR outlier flags, in input order.
pub fn iqr_flags(values: &[f64], k: f64) -> Vec<bool> {
    match IqrBounds::from_values(values, k) {
        Some(bounds) => values.iter().map(|v| !bounds.contains(*v)).collect(),
        None => vec![false; values.len()],
    }
}

/// Per-value flags for |z| above `threshold`, using the sample standard
/// deviation. Constant or single-value inputs flag nothing.
pub fn zscore_flags(values: &[f64], threshold: f64) -> Vec<bool> {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n < 2 {
        return vec![false; values.len()];
    }

    let mean = sorted.iter().sum::<f64>() / n as f64;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 || !std_dev.is_finite() {
        return vec![false; values.len()];
    }

    values
        .iter()
        .map(|v| v.is_finite() && ((v - mean) / std_dev).abs() > threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.25), Some(1.75));
        assert_eq!(quantile(&sorted, 0.5), Some(2.5));
        assert_eq!(quantile(&sorted, 0.75), Some(3.25));
        assert_eq!(quantile(&[7.0], 0.75), Some(7.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_iqr_bounds() {
        let bounds = IqrBounds::from_values(&[25.0, 15.0, 20.0, 17.5, 22.5], 1.5).unwrap();
        assert_eq!(bounds.q1, 17.5);
        assert_eq!(bounds.q3, 22.5);
        assert_eq!(bounds.lower, 10.0);
        assert_eq!(bounds.upper, 30.0);
        assert!(bounds.contains(30.0));
        assert!(!bounds.contains(85.0));
    }

    #[test]
    fn test_iqr_flags_keep_order() {
        let flags = iqr_flags(&[20.0, 21.0, 19.0, 85.0, 20.5, 19.5], 1.5);
        assert_eq!(flags, vec![false, false, false, true, false, false]);
    }

    #[test]
    fn test_zscore_flags() {
        let mut values = vec![10.0; 30];
        values.push(100.0);
        let flags = zscore_flags(&values, 3.0);
        assert!(flags[30]);
        assert_eq!(flags.iter().filter(|f| **f).count(), 1);

        assert_eq!(zscore_flags(&[5.0, 5.0, 5.0], 3.0), vec![false; 3]);
        assert_eq!(zscore_flags(&[5.0], 3.0), vec![false]);
    }
}
