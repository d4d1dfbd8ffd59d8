//! Phone / cigarette behavior thresholds and operator profile

use super::{confidence_for, CalibrationInfo, ModuleCalibration, ModuleCalibrator, SOURCE_MANUAL};
use crate::metrics::{series, PhotoMetrics};
use crate::statistics::{coefficient_of_variation, mean, Distribution, LightingStats, Spread, DARK_PHOTO_LEVEL};
use crate::{BaselineStore, CalibrationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorThresholds {
    /// Minimum object detection confidence by day
    pub confidence_threshold: f32,
    /// Minimum object detection confidence at night
    pub night_confidence_threshold: f32,
    /// Seconds of phone use before the first alert
    pub phone_alert_threshold_1: f64,
    /// Seconds of phone use before the critical alert
    pub phone_alert_threshold_2: f64,
    /// Window (seconds) for counting cigarette sightings
    pub cigarette_pattern_window: f64,
    /// Sightings inside the window that form a smoking pattern
    pub cigarette_pattern_threshold: usize,
    /// Seconds of continuous cigarette presence before an alert
    pub cigarette_continuous_threshold: f64,
    pub night_mode_threshold: f64,
    pub enable_night_mode: bool,
    /// Objects count when inside the face box grown by this factor
    pub face_proximity_factor: f64,
    pub enable_optimization: bool,
    /// Run object detection every N frames
    pub processing_interval: u32,
    pub roi_enabled: bool,
    pub roi_scale_factor: f64,
    pub calibration_confidence: f64,
}

impl Default for BehaviorThresholds {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            night_confidence_threshold: 0.35,
            phone_alert_threshold_1: 3.0,
            phone_alert_threshold_2: 7.0,
            cigarette_pattern_window: 30.0,
            cigarette_pattern_threshold: 3,
            cigarette_continuous_threshold: 7.0,
            night_mode_threshold: 50.0,
            enable_night_mode: true,
            face_proximity_factor: 2.0,
            enable_optimization: true,
            processing_interval: 2,
            roi_enabled: true,
            roi_scale_factor: 0.6,
            calibration_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceGeometry {
    pub nose_mouth_distance_mean: f64,
    pub nose_mouth_distance_std: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_area_stats: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting_stats: Option<LightingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_geometry: Option<FaceGeometry>,
}

#[derive(Debug, Clone, Default)]
pub struct BehaviorData {
    pub face_areas: Vec<f64>,
    pub nose_to_mouth: Vec<f64>,
    pub light_levels: Vec<f64>,
}

/// Observed behavior tendencies; populated from history once it exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorTendencies {
    pub phone_usage_frequency: f64,
    pub smoking_frequency: f64,
    pub typical_alert_times: Vec<String>,
    pub risk_level: String,
}

impl Default for BehaviorTendencies {
    fn default() -> Self {
        Self {
            phone_usage_frequency: 0.0,
            smoking_frequency: 0.0,
            typical_alert_times: Vec::new(),
            risk_level: "low".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorBehaviorProfile {
    pub operator_id: String,
    pub has_calibration: bool,
    pub calibration_confidence: f64,
    pub thresholds: BehaviorThresholds,
    pub statistics: Option<BehaviorStatistics>,
    pub behavior_tendencies: BehaviorTendencies,
    pub last_updated: Option<DateTime<Utc>>,
}

pub type BehaviorBaseline = ModuleCalibration<BehaviorThresholds, BehaviorStatistics>;

#[derive(Debug, Clone)]
pub struct BehaviorCalibration {
    store: BaselineStore,
}

impl BehaviorCalibration {
    pub fn new(store: BaselineStore) -> Self {
        Self { store }
    }

    /// Merge `updates` into the stored thresholds, creating a manual baseline if needed
    pub fn update_thresholds(
        &self,
        operator_id: &str,
        updates: &Map<String, Value>,
    ) -> Result<BehaviorThresholds, CalibrationError> {
        let mut baseline = self.load_calibration(operator_id).unwrap_or_else(|| BehaviorBaseline {
            operator_id: operator_id.to_string(),
            calibration_info: CalibrationInfo::new(0, Self::VERSION, SOURCE_MANUAL),
            thresholds: BehaviorThresholds::default(),
            statistics: BehaviorStatistics::default(),
        });

        let mut merged = serde_json::to_value(&baseline.thresholds)
            .map_err(|e| CalibrationError::Serialization(e.to_string()))?;
        if let Value::Object(current) = &mut merged {
            for (k, v) in updates {
                current.insert(k.clone(), v.clone());
            }
        }
        baseline.thresholds = serde_json::from_value(merged)
            .map_err(|e| CalibrationError::Serialization(e.to_string()))?;
        baseline.calibration_info.last_updated = Some(Utc::now());

        self.store.save(operator_id, &Self::file_name(), &baseline)?;
        info!("Behavior thresholds updated for {}: {:?}", operator_id, updates.keys().collect::<Vec<_>>());
        Ok(baseline.thresholds)
    }

    pub fn get_operator_profile(&self, operator_id: &str) -> OperatorBehaviorProfile {
        match self.load_calibration(operator_id) {
            Some(b) => OperatorBehaviorProfile {
                operator_id: operator_id.to_string(),
                has_calibration: true,
                calibration_confidence: b.thresholds.calibration_confidence,
                last_updated: b.calibration_info.last_updated.or(Some(b.calibration_info.created_at)),
                thresholds: b.thresholds,
                statistics: Some(b.statistics),
                behavior_tendencies: BehaviorTendencies::default(),
            },
            None => OperatorBehaviorProfile {
                operator_id: operator_id.to_string(),
                has_calibration: false,
                calibration_confidence: 0.0,
                thresholds: BehaviorThresholds::default(),
                statistics: None,
                behavior_tendencies: BehaviorTendencies::default(),
                last_updated: None,
            },
        }
    }
}

impl ModuleCalibrator for BehaviorCalibration {
    type Input = BehaviorData;
    type Thresholds = BehaviorThresholds;
    type Statistics = BehaviorStatistics;

    const MODULE: &'static str = "behavior";

    fn store(&self) -> &BaselineStore {
        &self.store
    }

    fn prepare(metrics: &[PhotoMetrics]) -> BehaviorData {
        BehaviorData {
            face_areas: series(metrics, |m| m.face_area),
            nose_to_mouth: series(metrics, |m| m.nose_to_mouth),
            light_levels: series(metrics, |m| m.light_level),
        }
    }

    fn derive(&self, data: &BehaviorData, photos: usize) -> (BehaviorThresholds, BehaviorStatistics) {
        let mut t = BehaviorThresholds::default();

        if !data.face_areas.is_empty() {
            let avg_area = mean(&data.face_areas);
            if avg_area > 20_000.0 {
                t.face_proximity_factor = 1.5;
            } else if avg_area < 10_000.0 {
                t.face_proximity_factor = 2.5;
            }
            if coefficient_of_variation(&data.face_areas).is_some_and(|cv| cv < 0.2) {
                t.confidence_threshold = 0.35;
            }
        }
        if !data.light_levels.is_empty() && mean(&data.light_levels) < DARK_PHOTO_LEVEL {
            t.night_confidence_threshold = 0.3;
            t.night_mode_threshold = 60.0;
        }
        t.calibration_confidence = confidence_for(photos);

        let statistics = BehaviorStatistics {
            face_area_stats: Distribution::compute(&data.face_areas, &[25, 50, 75]),
            lighting_stats: LightingStats::compute(&data.light_levels),
            face_geometry: Spread::compute(&data.nose_to_mouth).map(|s| FaceGeometry {
                nose_mouth_distance_mean: s.mean,
                nose_mouth_distance_std: s.std,
            }),
        };
        (t, statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::scratch_dir;
    use serde_json::json;

    fn data(areas: &[f64], light: f64) -> BehaviorData {
        BehaviorData {
            face_areas: areas.to_vec(),
            nose_to_mouth: vec![40.0; areas.len()],
            light_levels: vec![light; areas.len()],
        }
    }

    #[test]
    fn test_close_face_consistent_photos() {
        let cal = BehaviorCalibration::new(BaselineStore::new(scratch_dir("behavior")));
        let (t, stats) = cal.derive(&data(&[30_000.0, 31_000.0], 120.0), 2);
        assert_eq!(t.face_proximity_factor, 1.5);
        assert_eq!(t.confidence_threshold, 0.35);
        assert!(stats.face_geometry.is_some());
    }

    #[test]
    fn test_far_face_dark_photos() {
        let cal = BehaviorCalibration::new(BaselineStore::new(scratch_dir("behavior2")));
        let (t, _) = cal.derive(&data(&[2_000.0, 12_000.0], 30.0), 2);
        assert_eq!(t.face_proximity_factor, 2.5);
        assert_eq!(t.confidence_threshold, 0.4);
        assert_eq!(t.night_confidence_threshold, 0.3);
        assert_eq!(t.night_mode_threshold, 60.0);
    }

    #[test]
    fn test_update_thresholds_creates_manual_baseline() {
        let cal = BehaviorCalibration::new(BaselineStore::new(scratch_dir("behavior3")));
        let mut updates = Map::new();
        updates.insert("phone_alert_threshold_1".into(), json!(4.0));

        let t = cal.update_thresholds("op", &updates).unwrap();
        assert_eq!(t.phone_alert_threshold_1, 4.0);
        assert_eq!(t.phone_alert_threshold_2, 7.0);

        let stored = cal.load_calibration("op").unwrap();
        assert_eq!(stored.calibration_info.source, SOURCE_MANUAL);
        assert!(stored.calibration_info.last_updated.is_some());
    }

    #[test]
    fn test_operator_profile() {
        let cal = BehaviorCalibration::new(BaselineStore::new(scratch_dir("behavior4")));
        let empty = cal.get_operator_profile("ghost");
        assert!(!empty.has_calibration);
        assert_eq!(empty.behavior_tendencies.risk_level, "low");

        cal.calibrate_from_extracted_data("op", &data(&[15_000.0, 15_500.0], 120.0), 3).unwrap();
        let profile = cal.get_operator_profile("op");
        assert!(profile.has_calibration);
        assert_eq!(profile.calibration_confidence, 0.75);
        assert!(profile.last_updated.is_some());
    }
}
