//! Descriptive statistics over calibration samples
//!
//! Standard deviation is the population form (divide by `n`) and
//! percentiles use linear interpolation between closest ranks, so values
//! line up with what the baseline files have always contained.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean of a slice. Empty input yields 0.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation. Empty input yields 0.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile `p` (0-100) with linear interpolation. Empty input yields 0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// std / mean, or `None` when the mean is not positive
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values);
    if m > 0.0 {
        Some(std_dev(values) / m)
    } else {
        None
    }
}

/// Summary of one scalar metric across photos
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl Summary {
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            mean: mean(values),
            std: std_dev(values),
            min: values.iter().cloned().fold(f64::MAX, f64::min),
            max: values.iter().cloned().fold(f64::MIN, f64::max),
            median: median(values),
        }
    }
}

/// Mean and spread only
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub mean: f64,
    pub std: f64,
}

impl Spread {
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            mean: mean(values),
            std: std_dev(values),
        })
    }
}

/// Distribution with selected percentiles, keyed by percentile ("25", "50", ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: BTreeMap<String, f64>,
}

impl Distribution {
    pub fn compute(values: &[f64], points: &[u8]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let summary = Summary::compute(values);
        let percentiles = points
            .iter()
            .map(|&p| (p.to_string(), percentile(values, p as f64)))
            .collect();
        Some(Self {
            mean: summary.mean,
            std: summary.std,
            min: summary.min,
            max: summary.max,
            percentiles,
        })
    }

    pub fn percentile(&self, p: u8) -> Option<f64> {
        self.percentiles.get(&p.to_string()).copied()
    }
}

/// Lighting summary shared by several calibrators
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LightingStats {
    pub mean: f64,
    pub std: f64,
    pub predominantly_dark: bool,
}

/// Mean luma below which calibration photos count as dark
pub const DARK_PHOTO_LEVEL: f64 = 80.0;

impl LightingStats {
    pub fn compute(light_levels: &[f64]) -> Option<Self> {
        let spread = Spread::compute(light_levels)?;
        Some(Self {
            mean: spread.mean,
            std: spread.std,
            predominantly_dark: spread.mean < DARK_PHOTO_LEVEL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mean_computation() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((mean(&values) - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_std_dev_computation() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&values) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![0.28, 0.30, 0.32, 0.30];
        assert!((percentile(&values, 20.0) - 0.292).abs() < 1e-9);
        assert!((percentile(&values, 80.0) - 0.308).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.0), 0.28);
        assert_eq!(percentile(&values, 100.0), 0.32);
        assert!((median(&[1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(Summary::compute(&[]), Summary::default());
        assert!(Distribution::compute(&[], &[25]).is_none());
        assert!(coefficient_of_variation(&[]).is_none());
    }

    #[test]
    fn test_lighting_dark_flag() {
        assert!(LightingStats::compute(&[40.0, 60.0]).unwrap().predominantly_dark);
        assert!(!LightingStats::compute(&[120.0, 140.0]).unwrap().predominantly_dark);
    }

    proptest! {
        #[test]
        fn test_summary_bounds(values in prop::collection::vec(-1000.0f64..1000.0, 1..50)) {
            let s = Summary::compute(&values);
            prop_assert!(s.min <= s.mean + 1e-9 && s.mean <= s.max + 1e-9);
            prop_assert!(s.min <= s.median && s.median <= s.max);
            prop_assert!(s.std >= 0.0);
        }

        #[test]
        fn test_percentile_monotonic(values in prop::collection::vec(0.0f64..1.0, 1..30), a in 0.0f64..100.0, b in 0.0f64..100.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(percentile(&values, lo) <= percentile(&values, hi) + 1e-12);
        }
    }
}
