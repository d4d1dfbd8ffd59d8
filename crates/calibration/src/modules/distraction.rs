//! Head-rotation (distraction) thresholds

use super::{confidence_for, ModuleCalibrator};
use crate::metrics::{series, PhotoMetrics};
use crate::statistics::{mean, std_dev, Distribution, Spread, DARK_PHOTO_LEVEL};
use crate::BaselineStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Alert level timings are fixed regardless of what a baseline file says
pub const LEVEL1_TIME: f64 = 3.0;
pub const LEVEL2_TIME: f64 = 7.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistractionThresholds {
    pub rotation_threshold_day: f64,
    pub rotation_threshold_night: f64,
    pub extreme_rotation_threshold: f64,
    /// Seconds of extreme rotation before the first alert
    pub level1_time: f64,
    /// Seconds of extreme rotation before the second alert
    pub level2_time: f64,
    pub visibility_threshold: f64,
    pub frames_without_face_limit: u32,
    pub confidence_threshold: f64,
    pub night_mode_threshold: f64,
    pub enable_night_mode: bool,
    pub prediction_buffer_size: usize,
    /// Window (seconds) for counting repeated distractions
    pub distraction_window: f64,
    pub min_frames_for_reset: u32,
    pub audio_enabled: bool,
    pub level1_volume: f32,
    pub level2_volume: f32,
    pub camera_fps: f64,
    pub calibration_confidence: f64,
}

impl Default for DistractionThresholds {
    fn default() -> Self {
        Self {
            rotation_threshold_day: 2.6,
            rotation_threshold_night: 2.8,
            extreme_rotation_threshold: 2.5,
            level1_time: LEVEL1_TIME,
            level2_time: LEVEL2_TIME,
            visibility_threshold: 15.0,
            frames_without_face_limit: 5,
            confidence_threshold: 0.7,
            night_mode_threshold: 50.0,
            enable_night_mode: true,
            prediction_buffer_size: 10,
            distraction_window: 600.0,
            min_frames_for_reset: 10,
            audio_enabled: true,
            level1_volume: 0.8,
            level2_volume: 1.0,
            camera_fps: 4.0,
            calibration_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistractionStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_stats: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilt_stats: Option<Spread>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_width_stats: Option<Spread>,
}

#[derive(Debug, Clone, Default)]
pub struct DistractionData {
    pub head_tilts: Vec<f64>,
    pub head_rotations: Vec<f64>,
    pub face_widths: Vec<f64>,
    pub light_levels: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct DistractionCalibration {
    store: BaselineStore,
}

impl DistractionCalibration {
    pub fn new(store: BaselineStore) -> Self {
        Self { store }
    }
}

impl ModuleCalibrator for DistractionCalibration {
    type Input = DistractionData;
    type Thresholds = DistractionThresholds;
    type Statistics = DistractionStatistics;

    const MODULE: &'static str = "distraction";

    fn store(&self) -> &BaselineStore {
        &self.store
    }

    fn prepare(metrics: &[PhotoMetrics]) -> DistractionData {
        DistractionData {
            head_tilts: series(metrics, |m| m.head_tilt),
            head_rotations: series(metrics, |m| m.head_rotation),
            face_widths: series(metrics, |m| m.face_width),
            light_levels: series(metrics, |m| m.light_level),
        }
    }

    fn derive(&self, data: &DistractionData, photos: usize) -> (DistractionThresholds, DistractionStatistics) {
        let mut t = DistractionThresholds::default();

        if !data.head_rotations.is_empty() {
            let spread = std_dev(&data.head_rotations);
            if spread > 0.3 {
                t.rotation_threshold_day = 2.8;
                t.rotation_threshold_night = 3.0;
            } else if spread < 0.1 {
                t.rotation_threshold_day = 2.4;
                t.rotation_threshold_night = 2.6;
            }
        }
        if !data.light_levels.is_empty() && mean(&data.light_levels) < DARK_PHOTO_LEVEL {
            t.night_mode_threshold = 90.0;
        }
        if !data.face_widths.is_empty() && mean(&data.face_widths) < 100.0 {
            t.visibility_threshold = 10.0;
        }
        t.calibration_confidence = confidence_for(photos);

        let statistics = DistractionStatistics {
            rotation_stats: Distribution::compute(&data.head_rotations, &[25, 50, 75]),
            tilt_stats: Spread::compute(&data.head_tilts),
            face_width_stats: Spread::compute(&data.face_widths),
        };
        (t, statistics)
    }

    fn get_thresholds(&self, operator_id: &str) -> DistractionThresholds {
        match self.load_calibration(operator_id) {
            Some(c) => DistractionThresholds {
                level1_time: LEVEL1_TIME,
                level2_time: LEVEL2_TIME,
                ..c.thresholds
            },
            None => {
                debug!("No distraction calibration for {}, using defaults", operator_id);
                DistractionThresholds::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{CalibrationInfo, ModuleCalibration, SOURCE_MASTER};
    use crate::store::tests::scratch_dir;

    fn data(rotations: &[f64], width: f64, light: f64) -> DistractionData {
        DistractionData {
            head_rotations: rotations.to_vec(),
            face_widths: vec![width; rotations.len()],
            light_levels: vec![light; rotations.len()],
            ..Default::default()
        }
    }

    #[test]
    fn test_stable_operator_gets_tighter_thresholds() {
        let cal = DistractionCalibration::new(BaselineStore::new(scratch_dir("distraction")));
        let (t, _) = cal.derive(&data(&[1.0, 1.02, 0.98], 180.0, 120.0), 3);
        assert_eq!(t.rotation_threshold_day, 2.4);
        assert_eq!(t.rotation_threshold_night, 2.6);
        assert_eq!(t.visibility_threshold, 15.0);
    }

    #[test]
    fn test_restless_small_dark_operator() {
        let cal = DistractionCalibration::new(BaselineStore::new(scratch_dir("distraction2")));
        let (t, _) = cal.derive(&data(&[0.5, 1.5], 80.0, 50.0), 2);
        assert_eq!(t.rotation_threshold_day, 2.8);
        assert_eq!(t.rotation_threshold_night, 3.0);
        assert_eq!(t.night_mode_threshold, 90.0);
        assert_eq!(t.visibility_threshold, 10.0);
    }

    #[test]
    fn test_level_times_are_forced() {
        let store = BaselineStore::new(scratch_dir("distraction3"));
        let cal = DistractionCalibration::new(store.clone());
        let edited = ModuleCalibration {
            operator_id: "op".to_string(),
            calibration_info: CalibrationInfo::new(4, "1.0", SOURCE_MASTER),
            thresholds: DistractionThresholds {
                level1_time: 10.0,
                level2_time: 20.0,
                rotation_threshold_day: 3.3,
                ..Default::default()
            },
            statistics: DistractionStatistics::default(),
        };
        store.save("op", &DistractionCalibration::file_name(), &edited).unwrap();

        let t = cal.get_thresholds("op");
        assert_eq!(t.level1_time, 3.0);
        assert_eq!(t.level2_time, 7.0);
        assert_eq!(t.rotation_threshold_day, 3.3);
    }
}
