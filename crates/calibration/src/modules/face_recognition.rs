//! Face matching tolerances

use super::{confidence_for, ModuleCalibrator};
use crate::metrics::{landmark_drift, series, PhotoMetrics};
use crate::statistics::{mean, LightingStats, Spread, DARK_PHOTO_LEVEL};
use crate::BaselineStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceRecognitionThresholds {
    /// Maximum embedding distance that still counts as a match
    pub face_tolerance: f64,
    /// Minimum `1 - distance` to accept an identity
    pub min_confidence: f64,
    pub recognition_threshold: f64,
    pub night_mode_threshold: f64,
    /// Added to `face_tolerance` when the frame is dark
    pub night_tolerance_adjustment: f64,
    pub enable_night_mode: bool,
    pub calibration_confidence: f64,
}

impl Default for FaceRecognitionThresholds {
    fn default() -> Self {
        Self {
            face_tolerance: 0.6,
            min_confidence: 0.4,
            recognition_threshold: 0.5,
            night_mode_threshold: 50.0,
            night_tolerance_adjustment: 0.1,
            enable_night_mode: true,
            calibration_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodingVariability {
    pub mean_std: f64,
    pub max_std: f64,
    pub consistency_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceRecognitionStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_variability: Option<EncodingVariability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting_stats: Option<LightingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_size_stats: Option<Spread>,
}

#[derive(Debug, Clone, Default)]
pub struct FaceRecognitionData {
    pub face_areas: Vec<f64>,
    pub light_levels: Vec<f64>,
    /// Landmark drift between consecutive photos
    pub face_encodings_std: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FaceRecognitionCalibration {
    store: BaselineStore,
}

impl FaceRecognitionCalibration {
    pub fn new(store: BaselineStore) -> Self {
        Self { store }
    }
}

impl ModuleCalibrator for FaceRecognitionCalibration {
    type Input = FaceRecognitionData;
    type Thresholds = FaceRecognitionThresholds;
    type Statistics = FaceRecognitionStatistics;

    const MODULE: &'static str = "face_recognition";
    const VERSION: &'static str = "2.0";

    fn store(&self) -> &BaselineStore {
        &self.store
    }

    fn prepare(metrics: &[PhotoMetrics]) -> FaceRecognitionData {
        FaceRecognitionData {
            face_areas: series(metrics, |m| m.face_area),
            light_levels: series(metrics, |m| m.light_level),
            face_encodings_std: landmark_drift(metrics),
        }
    }

    fn derive(
        &self,
        data: &FaceRecognitionData,
        photos: usize,
    ) -> (FaceRecognitionThresholds, FaceRecognitionStatistics) {
        let mut t = FaceRecognitionThresholds::default();

        if !data.face_encodings_std.is_empty() {
            let drift = mean(&data.face_encodings_std);
            if drift > 0.1 {
                t.face_tolerance = (0.6 + drift).min(0.8);
                t.recognition_threshold = (0.5 + drift).min(0.7);
            } else if drift < 0.05 {
                t.face_tolerance = 0.5;
                t.recognition_threshold = 0.4;
            }
        }
        if !data.light_levels.is_empty() && mean(&data.light_levels) < DARK_PHOTO_LEVEL {
            t.night_mode_threshold = 90.0;
            t.night_tolerance_adjustment = 0.15;
        }
        t.calibration_confidence = confidence_for(photos);

        let encoding_variability = if data.face_encodings_std.is_empty() {
            None
        } else {
            let m = mean(&data.face_encodings_std);
            Some(EncodingVariability {
                mean_std: m,
                max_std: data.face_encodings_std.iter().cloned().fold(f64::MIN, f64::max),
                consistency_score: 1.0 - m,
            })
        };
        let statistics = FaceRecognitionStatistics {
            encoding_variability,
            lighting_stats: LightingStats::compute(&data.light_levels),
            face_size_stats: Spread::compute(&data.face_areas),
        };
        (t, statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::scratch_dir;

    fn calibration() -> FaceRecognitionCalibration {
        FaceRecognitionCalibration::new(BaselineStore::new(scratch_dir("face")))
    }

    #[test]
    fn test_steady_photos_tighten_tolerance() {
        let data = FaceRecognitionData {
            face_encodings_std: vec![0.01, 0.02],
            light_levels: vec![120.0, 130.0],
            ..Default::default()
        };
        let (t, stats) = calibration().derive(&data, 3);
        assert_eq!(t.face_tolerance, 0.5);
        assert_eq!(t.recognition_threshold, 0.4);
        let v = stats.encoding_variability.unwrap();
        assert!((v.consistency_score - 0.985).abs() < 1e-9);
    }

    #[test]
    fn test_variable_photos_loosen_tolerance() {
        let data = FaceRecognitionData {
            face_encodings_std: vec![0.3, 0.5],
            light_levels: vec![40.0],
            ..Default::default()
        };
        let (t, _) = calibration().derive(&data, 2);
        assert_eq!(t.face_tolerance, 0.8);
        assert_eq!(t.recognition_threshold, 0.7);
        assert_eq!(t.night_tolerance_adjustment, 0.15);
    }

    #[test]
    fn test_middle_band_keeps_defaults() {
        let data = FaceRecognitionData {
            face_encodings_std: vec![0.07],
            ..Default::default()
        };
        let (t, _) = calibration().derive(&data, 2);
        assert_eq!(t.face_tolerance, 0.6);
        assert_eq!(t.recognition_threshold, 0.5);
    }
}
