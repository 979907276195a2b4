//! Summary statistics over a band sweep.

use serde::Serialize;

/// Summary of one vector reading.
///
/// Derived on demand from the samples it summarizes; never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateStats {
    /// Largest sample
    pub max: f64,
    /// Smallest sample
    pub min: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Middle of the sorted samples (mean of the two middle samples for even counts)
    pub median: f64,
    /// Sample standard deviation (n - 1 denominator), 0 for a single sample
    pub stddev: f64,
}

impl AggregateStats {
    /// Field suffixes in publishing order.
    pub const FIELDS: [&'static str; 5] = ["max", "min", "mean", "median", "stddev"];

    /// Reduce samples to summary statistics.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;

        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let stddev = if samples.len() < 2 {
            0.0
        } else {
            let sum_sq: f64 = samples.iter().map(|v| (v - mean).powi(2)).sum();
            (sum_sq / (n - 1.0)).sqrt()
        };

        Some(Self {
            max,
            min,
            mean,
            median,
            stddev,
        })
    }

    /// `(suffix, value)` pairs in [`Self::FIELDS`] order.
    pub fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("max", self.max),
            ("min", self.min),
            ("mean", self.mean),
            ("median", self.median),
            ("stddev", self.stddev),
        ]
    }
}

/// Free-function form of [`AggregateStats::from_samples`].
pub fn aggregate(samples: &[f64]) -> Option<AggregateStats> {
    AggregateStats::from_samples(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_band_sweep_summary() {
        let stats = aggregate(&[-40.0, -45.5, -38.2]).unwrap();
        assert_eq!(stats.max, -38.2);
        assert_eq!(stats.min, -45.5);
        assert_eq!(stats.median, -40.0);
        assert!(approx(stats.mean, -41.233, 1e-3), "mean {}", stats.mean);
        assert!(approx(stats.stddev, 3.80, 1e-2), "stddev {}", stats.stddev);
    }

    #[test]
    fn test_even_length_median() {
        let stats = aggregate(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.mean, 2.5);
    }

    #[test]
    fn test_single_sample() {
        let stats = aggregate(&[-70.0]).unwrap();
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.min, -70.0);
        assert_eq!(stats.max, -70.0);
        assert_eq!(stats.median, -70.0);
    }

    #[test]
    fn test_empty_has_no_summary() {
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn test_fields_order() {
        let stats = aggregate(&[1.0, 2.0, 3.0]).unwrap();
        let names: Vec<_> = stats.fields().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, AggregateStats::FIELDS);
        assert_eq!(stats.fields()[3], ("median", 2.0));
    }
}
