//! Mouth-opening (yawn) thresholds

use super::{confidence_for, ModuleCalibrator};
use crate::metrics::{series, PhotoMetrics};
use crate::statistics::{mean, std_dev, Distribution, Spread, DARK_PHOTO_LEVEL};
use crate::BaselineStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YawnThresholds {
    /// MAR above which the mouth counts as yawning
    pub mar_threshold: f64,
    /// Minimum yawn length in seconds
    pub duration_threshold: f64,
    pub frames_to_confirm: u32,
    pub night_mode_threshold: f64,
    /// Subtracted from `mar_threshold` in night mode
    pub night_adjustment: f64,
    pub enable_night_mode: bool,
    pub max_yawns_before_alert: usize,
    /// Sliding window for counting yawns (seconds)
    pub window_size: f64,
    pub calibration_confidence: f64,
}

impl Default for YawnThresholds {
    fn default() -> Self {
        Self {
            mar_threshold: 0.5,
            duration_threshold: 2.0,
            frames_to_confirm: 2,
            night_mode_threshold: 50.0,
            night_adjustment: 0.05,
            enable_night_mode: true,
            max_yawns_before_alert: 3,
            window_size: 600.0,
            calibration_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YawnStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mar_stats: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mouth_width_stats: Option<Spread>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mouth_height_stats: Option<Spread>,
}

#[derive(Debug, Clone, Default)]
pub struct YawnData {
    pub mar_values: Vec<f64>,
    pub mouth_widths: Vec<f64>,
    pub mouth_heights: Vec<f64>,
    pub light_levels: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct YawnCalibration {
    store: BaselineStore,
}

impl YawnCalibration {
    pub fn new(store: BaselineStore) -> Self {
        Self { store }
    }
}

impl ModuleCalibrator for YawnCalibration {
    type Input = YawnData;
    type Thresholds = YawnThresholds;
    type Statistics = YawnStatistics;

    const MODULE: &'static str = "yawn";

    fn store(&self) -> &BaselineStore {
        &self.store
    }

    fn prepare(metrics: &[PhotoMetrics]) -> YawnData {
        YawnData {
            mar_values: series(metrics, |m| m.mar),
            mouth_widths: series(metrics, |m| m.mouth_width),
            mouth_heights: series(metrics, |m| m.mouth_height),
            light_levels: series(metrics, |m| m.light_level),
        }
    }

    fn derive(&self, data: &YawnData, photos: usize) -> (YawnThresholds, YawnStatistics) {
        let mut t = YawnThresholds::default();

        if !data.mar_values.is_empty() {
            let mean_mar = mean(&data.mar_values);
            let candidate = mean_mar * 2.5 + std_dev(&data.mar_values) * 2.0;
            t.mar_threshold = candidate.clamp(0.35, 0.6);

            if mean_mar < 0.25 {
                t.duration_threshold = 2.0;
                t.frames_to_confirm = 2;
            } else if mean_mar > 0.4 {
                // naturally open mouth at rest
                t.mar_threshold = (mean_mar * 3.0).min(0.7);
            }
        }

        if !data.light_levels.is_empty() && mean(&data.light_levels) < DARK_PHOTO_LEVEL {
            t.night_mode_threshold = 90.0;
            t.night_adjustment = 0.08;
        }
        t.calibration_confidence = confidence_for(photos);

        let statistics = YawnStatistics {
            mar_stats: Distribution::compute(&data.mar_values, &[20, 50, 80]),
            mouth_width_stats: Spread::compute(&data.mouth_widths),
            mouth_height_stats: Spread::compute(&data.mouth_heights),
        };
        (t, statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::scratch_dir;

    fn calibration() -> YawnCalibration {
        YawnCalibration::new(BaselineStore::new(scratch_dir("yawn")))
    }

    fn data(mars: &[f64], light: f64) -> YawnData {
        YawnData {
            mar_values: mars.to_vec(),
            light_levels: vec![light; mars.len()],
            ..Default::default()
        }
    }

    #[test]
    fn test_closed_mouth_operator() {
        let (t, stats) = calibration().derive(&data(&[0.20, 0.20], 120.0), 2);
        // 0.2 * 2.5 = 0.5, inside the clamp
        assert!((t.mar_threshold - 0.5).abs() < 1e-9);
        assert_eq!(t.frames_to_confirm, 2);
        assert_eq!(t.night_mode_threshold, 50.0);
        assert!(stats.mar_stats.is_some());
    }

    #[test]
    fn test_open_mouth_operator() {
        let (t, _) = calibration().derive(&data(&[0.45, 0.45], 120.0), 2);
        assert!((t.mar_threshold - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_clamp_and_dark_photos() {
        let (t, _) = calibration().derive(&data(&[0.05, 0.05], 40.0), 4);
        assert_eq!(t.mar_threshold, 0.35);
        assert_eq!(t.night_mode_threshold, 90.0);
        assert_eq!(t.night_adjustment, 0.08);
        assert_eq!(t.calibration_confidence, 1.0);
    }
}
