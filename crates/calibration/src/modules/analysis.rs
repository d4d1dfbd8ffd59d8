//! Baseline for the emotion / stress / anomaly analysis layer
//!
//! Unlike the detector calibrators this one stores a single
//! `analysis_baseline.json` describing the operator's resting face, the
//! analysis thresholds derived from it and the conditions the photos were
//! taken in.

use super::{confidence_for, Calibrator};
use crate::metrics::{series, PhotoMetrics};
use crate::statistics::{mean, std_dev, LightingStats};
use crate::{BaselineStore, CalibrationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const ANALYSIS_FILE: &str = "analysis_baseline.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeOpenness {
    pub avg: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Blinks per minute assumed at rest
    pub blink_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvgStd {
    pub avg: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacialMetrics {
    pub eye_openness: EyeOpenness,
    pub eyebrow_distance: AvgStd,
    pub mouth_ratio: AvgStd,
    pub face_width: AvgStd,
    pub jaw_tension: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisFatigueThresholds {
    pub microsleep: f64,
    pub severe: f64,
    /// Blink duration (seconds) above which a blink counts as slow
    pub blink_duration: f64,
}

impl Default for AnalysisFatigueThresholds {
    fn default() -> Self {
        Self {
            microsleep: 0.15,
            severe: 0.10,
            blink_duration: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisStressThresholds {
    pub high_tension: f64,
    pub movement: f64,
    pub jaw_tension: f64,
}

impl Default for AnalysisStressThresholds {
    fn default() -> Self {
        Self {
            high_tension: 0.7,
            movement: 0.05,
            jaw_tension: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisThresholds {
    pub fatigue: AnalysisFatigueThresholds,
    pub stress: AnalysisStressThresholds,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConditions {
    pub lighting_average: f64,
    pub lighting_variation: f64,
    pub predominantly_dark: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBaseline {
    pub operator_id: String,
    pub created_at: DateTime<Utc>,
    pub photos_processed: usize,
    pub calibration_confidence: f64,
    pub facial_metrics: FacialMetrics,
    pub thresholds: AnalysisThresholds,
    pub environment_conditions: EnvironmentConditions,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisData {
    pub ear_values: Vec<f64>,
    pub mar_values: Vec<f64>,
    pub eyebrow_distances: Vec<f64>,
    pub face_widths: Vec<f64>,
    pub face_heights: Vec<f64>,
    pub light_levels: Vec<f64>,
}

impl AnalysisData {
    pub fn from_metrics(metrics: &[PhotoMetrics]) -> Self {
        Self {
            ear_values: series(metrics, |m| m.avg_ear),
            mar_values: series(metrics, |m| m.mar),
            eyebrow_distances: series(metrics, |m| m.eyebrow_distance),
            face_widths: series(metrics, |m| m.face_width),
            face_heights: series(metrics, |m| m.face_height),
            light_levels: series(metrics, |m| m.light_level),
        }
    }
}

fn avg_std(values: &[f64]) -> AvgStd {
    AvgStd {
        avg: mean(values),
        std: std_dev(values),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Weighted mix of photo count, EAR consistency and lighting variety
pub fn quality_score(data: &AnalysisData, photos: usize) -> f64 {
    let mut score = 0.3 * confidence_for(photos);
    if data.ear_values.len() > 1 {
        let m = mean(&data.ear_values);
        if m > 0.0 {
            score += 0.4 * (1.0 - (std_dev(&data.ear_values) / m).min(1.0));
        }
    }
    if data.light_levels.len() > 1 {
        score += 0.3 * (std_dev(&data.light_levels) / 50.0).min(1.0);
    }
    round2(score)
}

#[derive(Debug, Clone)]
pub struct AnalysisCalibration {
    store: BaselineStore,
    current: Option<AnalysisBaseline>,
}

impl AnalysisCalibration {
    pub fn new(store: BaselineStore) -> Self {
        Self { store, current: None }
    }

    pub fn build_baseline(operator_id: &str, data: &AnalysisData, photos: usize) -> AnalysisBaseline {
        let ear = &data.ear_values;
        let eye_openness = EyeOpenness {
            avg: mean(ear),
            std: std_dev(ear),
            min: ear.iter().cloned().reduce(f64::min).unwrap_or(0.0),
            max: ear.iter().cloned().reduce(f64::max).unwrap_or(0.0),
            blink_rate: 15.0,
        };
        let facial_metrics = FacialMetrics {
            eyebrow_distance: avg_std(&data.eyebrow_distances),
            mouth_ratio: avg_std(&data.mar_values),
            face_width: avg_std(&data.face_widths),
            jaw_tension: 0.5,
            eye_openness,
        };

        let mut thresholds = AnalysisThresholds::default();
        if !ear.is_empty() {
            thresholds.fatigue.microsleep = facial_metrics.eye_openness.avg * 0.6;
            thresholds.fatigue.severe = facial_metrics.eye_openness.avg * 0.4;
        }
        if !data.eyebrow_distances.is_empty() {
            thresholds.stress.high_tension = facial_metrics.eyebrow_distance.avg * 0.7;
        }

        let environment_conditions = match LightingStats::compute(&data.light_levels) {
            Some(l) => EnvironmentConditions {
                lighting_average: l.mean,
                lighting_variation: l.std,
                predominantly_dark: l.predominantly_dark,
            },
            None => EnvironmentConditions::default(),
        };

        AnalysisBaseline {
            operator_id: operator_id.to_string(),
            created_at: Utc::now(),
            photos_processed: photos,
            calibration_confidence: confidence_for(photos),
            facial_metrics,
            thresholds,
            environment_conditions,
            quality_score: quality_score(data, photos),
        }
    }

    pub fn calibrate_from_extracted_data(
        &self,
        operator_id: &str,
        data: &AnalysisData,
        photos: usize,
    ) -> Result<AnalysisBaseline, CalibrationError> {
        let baseline = Self::build_baseline(operator_id, data, photos);
        self.store.save(operator_id, ANALYSIS_FILE, &baseline)?;
        info!(
            "analysis baseline saved for operator {} (quality {:.2})",
            operator_id, baseline.quality_score
        );
        Ok(baseline)
    }

    /// Load the operator's baseline and make it current; false when absent
    pub fn load_baseline(&mut self, operator_id: &str) -> bool {
        self.current = self.store.load_or_none(operator_id, ANALYSIS_FILE);
        if self.current.is_none() {
            debug!("No analysis baseline for {}", operator_id);
        }
        self.current.is_some()
    }

    pub fn current_baseline(&self) -> Option<&AnalysisBaseline> {
        self.current.as_ref()
    }

    pub fn is_operator_calibrated(&self, operator_id: &str) -> bool {
        self.store.exists(operator_id, ANALYSIS_FILE)
    }

    pub fn baseline_date(&self, operator_id: &str) -> Option<DateTime<Utc>> {
        self.store
            .load_or_none::<AnalysisBaseline>(operator_id, ANALYSIS_FILE)
            .map(|b| b.created_at)
    }

    pub fn get_thresholds(&self, operator_id: &str) -> AnalysisThresholds {
        self.store
            .load_or_none::<AnalysisBaseline>(operator_id, ANALYSIS_FILE)
            .map(|b| b.thresholds)
            .unwrap_or_default()
    }
}

impl Calibrator for AnalysisCalibration {
    fn module(&self) -> &'static str {
        "analysis"
    }

    fn calibrate_metrics(&self, operator_id: &str, metrics: &[PhotoMetrics]) -> Result<(), CalibrationError> {
        let data = AnalysisData::from_metrics(metrics);
        self.calibrate_from_extracted_data(operator_id, &data, metrics.len())
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::photos;
    use crate::store::tests::scratch_dir;

    #[test]
    fn test_thresholds_follow_eye_openness() {
        let data = AnalysisData::from_metrics(&photos(&[0.30, 0.30], 120.0));
        let b = AnalysisCalibration::build_baseline("op", &data, 2);
        assert!((b.thresholds.fatigue.microsleep - 0.18).abs() < 1e-9);
        assert!((b.thresholds.fatigue.severe - 0.12).abs() < 1e-9);
        assert_eq!(b.facial_metrics.jaw_tension, 0.5);
        assert_eq!(b.facial_metrics.eye_openness.blink_rate, 15.0);
    }

    #[test]
    fn test_quality_score() {
        // 0.3 * 0.5 + 0.4 * 1.0 + 0.3 * 0.0
        let data = AnalysisData {
            ear_values: vec![0.3, 0.3],
            light_levels: vec![100.0, 100.0],
            ..Default::default()
        };
        assert_eq!(quality_score(&data, 2), 0.55);

        let single = AnalysisData {
            ear_values: vec![0.3],
            light_levels: vec![100.0],
            ..Default::default()
        };
        assert_eq!(quality_score(&single, 4), 0.3);
    }

    #[test]
    fn test_defaults_without_data() {
        let b = AnalysisCalibration::build_baseline("op", &AnalysisData::default(), 0);
        assert_eq!(b.thresholds, AnalysisThresholds::default());
        assert_eq!(b.quality_score, 0.0);
    }

    #[test]
    fn test_load_and_query() {
        let mut cal = AnalysisCalibration::new(BaselineStore::new(scratch_dir("analysis")));
        assert!(!cal.load_baseline("op"));
        assert!(cal.baseline_date("op").is_none());
        assert_eq!(cal.get_thresholds("op"), AnalysisThresholds::default());

        cal.calibrate_metrics("op", &photos(&[0.25, 0.35, 0.30], 60.0)).unwrap();
        assert!(cal.is_operator_calibrated("op"));
        assert!(cal.load_baseline("op"));
        let current = cal.current_baseline().unwrap();
        assert!(current.environment_conditions.predominantly_dark);
        assert_eq!(current.photos_processed, 3);
        assert!(cal.baseline_date("op").is_some());
    }
}
