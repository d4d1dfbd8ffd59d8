//! Eye-closure (fatigue) thresholds

use super::{confidence_for, ModuleCalibrator};
use crate::metrics::{series, PhotoMetrics};
use crate::statistics::{percentile, std_dev, Distribution, LightingStats, Spread};
use crate::BaselineStore;
use serde::{Deserialize, Serialize};

/// Bounds for a calibrated EAR threshold
pub const EAR_THRESHOLD_MIN: f64 = 0.15;
pub const EAR_THRESHOLD_MAX: f64 = 0.35;

/// Fatigue detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FatigueThresholds {
    /// Eyes count as closed below this EAR
    pub ear_threshold: f64,
    /// Subtracted from `ear_threshold` in night mode
    pub ear_night_adjustment: f64,
    /// Closure length (seconds) that counts as a microsleep
    pub microsleep_threshold: f64,
    /// Expected blinks per minute
    pub blink_rate_normal: f64,
    /// Consecutive frames needed to confirm an eye state change
    pub frames_to_confirm: u32,
    /// Mean luma below which the frame is treated as night
    pub night_mode_threshold: f64,
    pub calibration_confidence: f64,
}

impl Default for FatigueThresholds {
    fn default() -> Self {
        Self {
            ear_threshold: 0.20,
            ear_night_adjustment: 0.02,
            microsleep_threshold: 1.5,
            blink_rate_normal: 15.0,
            frames_to_confirm: 4,
            night_mode_threshold: 50.0,
            calibration_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FatigueStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ear_stats: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting_stats: Option<LightingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eye_distance_stats: Option<Spread>,
}

#[derive(Debug, Clone, Default)]
pub struct FatigueData {
    pub ear_values: Vec<f64>,
    pub left_ear_values: Vec<f64>,
    pub right_ear_values: Vec<f64>,
    pub light_levels: Vec<f64>,
    pub eye_distances: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FatigueCalibration {
    store: BaselineStore,
}

impl FatigueCalibration {
    pub fn new(store: BaselineStore) -> Self {
        Self { store }
    }
}

impl ModuleCalibrator for FatigueCalibration {
    type Input = FatigueData;
    type Thresholds = FatigueThresholds;
    type Statistics = FatigueStatistics;

    const MODULE: &'static str = "fatigue";

    fn store(&self) -> &BaselineStore {
        &self.store
    }

    fn prepare(metrics: &[PhotoMetrics]) -> FatigueData {
        FatigueData {
            ear_values: series(metrics, |m| m.avg_ear),
            left_ear_values: series(metrics, |m| m.left_ear),
            right_ear_values: series(metrics, |m| m.right_ear),
            light_levels: series(metrics, |m| m.light_level),
            eye_distances: series(metrics, |m| m.eye_distance),
        }
    }

    fn derive(&self, data: &FatigueData, photos: usize) -> (FatigueThresholds, FatigueStatistics) {
        let mut thresholds = FatigueThresholds::default();

        if !data.ear_values.is_empty() {
            // 30% of the way from a nearly-closed to a relaxed-open eye
            let p20 = percentile(&data.ear_values, 20.0);
            let p80 = percentile(&data.ear_values, 80.0);
            thresholds.ear_threshold =
                (p20 + (p80 - p20) * 0.3).clamp(EAR_THRESHOLD_MIN, EAR_THRESHOLD_MAX);
            thresholds.ear_night_adjustment = (std_dev(&data.ear_values) * 0.5).min(0.05);
        }
        thresholds.calibration_confidence = confidence_for(photos);

        let statistics = FatigueStatistics {
            ear_stats: Distribution::compute(&data.ear_values, &[25, 50, 75]),
            lighting_stats: LightingStats::compute(&data.light_levels),
            eye_distance_stats: Spread::compute(&data.eye_distances),
        };
        (thresholds, statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::photos;
    use crate::store::tests::scratch_dir;

    #[test]
    fn test_percentile_threshold() {
        let cal = FatigueCalibration::new(BaselineStore::new(scratch_dir("fatigue")));
        let data = FatigueCalibration::prepare(&photos(&[0.28, 0.30, 0.32, 0.30], 120.0));
        let (t, stats) = cal.derive(&data, 4);
        // p20 = 0.292, p80 = 0.308
        assert!((t.ear_threshold - 0.2968).abs() < 1e-9);
        assert!(t.ear_night_adjustment <= 0.05);
        assert_eq!(t.calibration_confidence, 1.0);
        assert_eq!(t.frames_to_confirm, 4);
        assert!(stats.ear_stats.unwrap().percentile(50).is_some());
    }

    #[test]
    fn test_threshold_is_clamped() {
        let cal = FatigueCalibration::new(BaselineStore::new(scratch_dir("fatigue-clamp")));
        let wide = FatigueCalibration::prepare(&photos(&[0.9, 1.0], 120.0));
        assert_eq!(cal.derive(&wide, 2).0.ear_threshold, EAR_THRESHOLD_MAX);
        let narrow = FatigueCalibration::prepare(&photos(&[0.05, 0.06], 120.0));
        assert_eq!(cal.derive(&narrow, 2).0.ear_threshold, EAR_THRESHOLD_MIN);
    }

    #[test]
    fn test_fallback_to_defaults() {
        let cal = FatigueCalibration::new(BaselineStore::new(scratch_dir("fatigue-default")));
        assert_eq!(cal.get_thresholds("nobody"), FatigueThresholds::default());

        let data = FatigueCalibration::prepare(&photos(&[0.28, 0.30], 120.0));
        cal.calibrate_from_extracted_data("op", &data, 2).unwrap();
        let loaded = cal.get_thresholds("op");
        assert_eq!(loaded.calibration_confidence, 0.5);
        assert!(cal.load_calibration("op").is_some());
    }
}
