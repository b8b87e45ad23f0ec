//! Mean and standard deviation over latency samples

use serde::{Deserialize, Serialize};

/// Arithmetic mean; 0 for an empty sequence
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for empty and single-element sequences
pub fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Aggregate of the fetch latencies collected in one run
///
/// `mean` and `stdev` are `None` when no fetch succeeded, so an empty run
/// is distinguishable from a run of zero-latency fetches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                mean: None,
                stdev: None,
            };
        }
        Self {
            count: samples.len(),
            mean: Some(mean(samples)),
            stdev: Some(stdev(samples)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_stdev_degenerate_inputs() {
        assert_eq!(stdev(&[]), 0.0);
        assert_eq!(stdev(&[4.2]), 0.0);
    }

    #[test]
    fn test_stdev_population() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((stdev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_marks_empty_run() {
        let empty = LatencySummary::from_samples(&[]);
        assert!(empty.is_empty());
        assert_eq!(empty.mean, None);
        assert_eq!(empty.stdev, None);

        let one = LatencySummary::from_samples(&[0.25]);
        assert_eq!(one.count, 1);
        assert_eq!(one.mean, Some(0.25));
        assert_eq!(one.stdev, Some(0.0));
    }
}
