//! Master baseline: every scalar metric summarised across the calibration photos

use crate::metrics::{reference_landmarks, series, PhotoMetrics};
use crate::statistics::{coefficient_of_variation, std_dev, Summary};
use crate::modules::IDEAL_PHOTO_COUNT;
use camera_capture::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MASTER_FILE: &str = "master_baseline.json";
pub const MASTER_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterCalibrationInfo {
    pub created_at: DateTime<Utc>,
    pub photos_processed: usize,
    pub version: String,
    pub model_used: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub consistency_score: f64,
    pub completeness: f64,
    pub lighting_variation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterBaseline {
    pub operator_id: String,
    pub operator_name: String,
    pub calibration_info: MasterCalibrationInfo,
    pub statistics: BTreeMap<String, Summary>,
    pub reference_landmarks: Vec<Point>,
    pub quality_metrics: QualityMetrics,
}

impl MasterBaseline {
    pub fn build(operator_id: &str, operator_name: &str, model_used: &str, metrics: &[PhotoMetrics]) -> Self {
        let mut statistics = BTreeMap::new();
        if let Some(first) = metrics.first() {
            for (i, (name, _)) in first.scalars().iter().enumerate() {
                let values: Vec<f64> = metrics.iter().map(|m| m.scalars()[i].1).collect();
                statistics.insert(name.to_string(), Summary::compute(&values));
            }
        }

        Self {
            operator_id: operator_id.to_string(),
            operator_name: operator_name.to_string(),
            calibration_info: MasterCalibrationInfo {
                created_at: Utc::now(),
                photos_processed: metrics.len(),
                version: MASTER_VERSION.to_string(),
                model_used: model_used.to_string(),
            },
            statistics,
            reference_landmarks: reference_landmarks(metrics),
            quality_metrics: quality_metrics(metrics),
        }
    }
}

/// Consistency of EAR, MAR and face width plus photo completeness and light spread
pub fn quality_metrics(metrics: &[PhotoMetrics]) -> QualityMetrics {
    let completeness = metrics.len() as f64 / IDEAL_PHOTO_COUNT;
    let lighting_variation = std_dev(&series(metrics, |m| m.light_level));

    let consistency_score = if metrics.len() < 2 {
        0.0
    } else {
        let cvs: Vec<f64> = [
            series(metrics, |m| m.avg_ear),
            series(metrics, |m| m.mar),
            series(metrics, |m| m.face_width),
        ]
        .iter()
        .filter_map(|v| coefficient_of_variation(v))
        .collect();
        if cvs.is_empty() {
            0.0
        } else {
            (1.0 - cvs.iter().sum::<f64>() / cvs.len() as f64).max(0.0)
        }
    };

    QualityMetrics {
        consistency_score,
        completeness,
        lighting_variation,
    }
}
