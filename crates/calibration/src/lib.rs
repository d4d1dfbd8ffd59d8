//! Per-operator calibration
//!
//! Turns a handful of calibration photos into personalised detector
//! thresholds:
//! - photo metrics (EAR, MAR, head pose, face size, lighting)
//! - a master baseline summarising every metric
//! - one baseline file per detector, with default fallback on load

pub mod baseline;
pub mod master;
pub mod metrics;
pub mod modules;
pub mod statistics;
pub mod store;

pub use baseline::MasterBaseline;
pub use master::{CalibrationReport, CalibrationSummary, MasterCalibrationManager};
pub use metrics::PhotoMetrics;
pub use modules::analysis::{AnalysisBaseline, AnalysisCalibration, AnalysisThresholds};
pub use modules::behavior::{BehaviorCalibration, BehaviorThresholds};
pub use modules::distraction::{DistractionCalibration, DistractionThresholds};
pub use modules::face_recognition::{FaceRecognitionCalibration, FaceRecognitionThresholds};
pub use modules::fatigue::{FatigueCalibration, FatigueThresholds};
pub use modules::yawn::{YawnCalibration, YawnThresholds};
pub use modules::{Calibrator, ModuleCalibrator};
pub use store::BaselineStore;

use thiserror::Error;

/// Calibration error types
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No photos found in {0}")]
    NoPhotos(String),

    #[error("Insufficient photos: found {found}, need {required}")]
    InsufficientPhotos { found: usize, required: usize },

    #[error("Invalid operator id: {0:?}")]
    InvalidOperatorId(String),

    #[error("Landmark detection failed: {0}")]
    Detection(String),

    #[error("No module could be calibrated for {0}")]
    NoModuleCalibrated(String),
}

/// Thresholds for every detector of one operator, defaults where uncalibrated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorThresholds {
    pub fatigue: FatigueThresholds,
    pub yawn: YawnThresholds,
    pub distraction: DistractionThresholds,
    pub behavior: BehaviorThresholds,
    pub face_recognition: FaceRecognitionThresholds,
    pub analysis: AnalysisThresholds,
}

impl OperatorThresholds {
    pub fn load(store: &BaselineStore, operator_id: &str) -> Self {
        Self {
            fatigue: FatigueCalibration::new(store.clone()).get_thresholds(operator_id),
            yawn: YawnCalibration::new(store.clone()).get_thresholds(operator_id),
            distraction: DistractionCalibration::new(store.clone()).get_thresholds(operator_id),
            behavior: BehaviorCalibration::new(store.clone()).get_thresholds(operator_id),
            face_recognition: FaceRecognitionCalibration::new(store.clone()).get_thresholds(operator_id),
            analysis: AnalysisCalibration::new(store.clone()).get_thresholds(operator_id),
        }
    }
}
