//! Per-detector calibrators
//!
//! Each calibrator turns the photo metrics of one operator into a
//! thresholds file for its detector. Loading always degrades to the
//! calibrator's defaults, so detectors never run without thresholds.

pub mod analysis;
pub mod behavior;
pub mod distraction;
pub mod face_recognition;
pub mod fatigue;
pub mod yawn;

use crate::metrics::PhotoMetrics;
use crate::{BaselineStore, CalibrationError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Source tag written by the master calibration run
pub const SOURCE_MASTER: &str = "master_calibration";
/// Source tag for thresholds edited after the fact
pub const SOURCE_MANUAL: &str = "manual_update";

/// Photos needed for full calibration confidence
pub const IDEAL_PHOTO_COUNT: f64 = 4.0;

/// `min(1, photos / 4)`
pub fn confidence_for(photos: usize) -> f64 {
    (photos as f64 / IDEAL_PHOTO_COUNT).min(1.0)
}

/// Provenance block shared by every baseline file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInfo {
    pub created_at: DateTime<Utc>,
    pub photos_processed: usize,
    pub version: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CalibrationInfo {
    pub fn new(photos_processed: usize, version: &str, source: &str) -> Self {
        Self {
            created_at: Utc::now(),
            photos_processed,
            version: version.to_string(),
            source: source.to_string(),
            last_updated: None,
        }
    }
}

/// On-disk layout of a module baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCalibration<T, S> {
    pub operator_id: String,
    pub calibration_info: CalibrationInfo,
    pub thresholds: T,
    pub statistics: S,
}

/// Shared behaviour of the threshold-producing calibrators
pub trait ModuleCalibrator {
    /// Module-specific view of the photo metrics
    type Input;
    type Thresholds: Serialize + DeserializeOwned + Default + Clone;
    type Statistics: Serialize + DeserializeOwned + Default;

    const MODULE: &'static str;
    const VERSION: &'static str = "1.0";

    fn store(&self) -> &BaselineStore;

    fn prepare(metrics: &[PhotoMetrics]) -> Self::Input;

    /// Thresholds and statistics for the given samples
    fn derive(&self, input: &Self::Input, photos: usize) -> (Self::Thresholds, Self::Statistics);

    fn file_name() -> String {
        format!("{}_baseline.json", Self::MODULE)
    }

    fn calibrate_from_extracted_data(
        &self,
        operator_id: &str,
        input: &Self::Input,
        photos: usize,
    ) -> Result<ModuleCalibration<Self::Thresholds, Self::Statistics>, CalibrationError> {
        let (thresholds, statistics) = self.derive(input, photos);
        let calibration = ModuleCalibration {
            operator_id: operator_id.to_string(),
            calibration_info: CalibrationInfo::new(photos, Self::VERSION, SOURCE_MASTER),
            thresholds,
            statistics,
        };
        self.store().save(operator_id, &Self::file_name(), &calibration)?;
        info!("{} calibration saved for operator {}", Self::MODULE, operator_id);
        Ok(calibration)
    }

    fn load_calibration(
        &self,
        operator_id: &str,
    ) -> Option<ModuleCalibration<Self::Thresholds, Self::Statistics>> {
        self.store().load_or_none(operator_id, &Self::file_name())
    }

    /// Calibrated thresholds, or the defaults when none are stored
    fn get_thresholds(&self, operator_id: &str) -> Self::Thresholds {
        match self.load_calibration(operator_id) {
            Some(c) => c.thresholds,
            None => {
                debug!("No {} calibration for {}, using defaults", Self::MODULE, operator_id);
                Self::Thresholds::default()
            }
        }
    }
}

/// Object-safe entry point the master manager iterates over
pub trait Calibrator: Send + Sync {
    fn module(&self) -> &'static str;
    fn calibrate_metrics(&self, operator_id: &str, metrics: &[PhotoMetrics]) -> Result<(), CalibrationError>;
}

fn run_module<C: ModuleCalibrator>(
    calibrator: &C,
    operator_id: &str,
    metrics: &[PhotoMetrics],
) -> Result<(), CalibrationError> {
    let input = C::prepare(metrics);
    calibrator
        .calibrate_from_extracted_data(operator_id, &input, metrics.len())
        .map(|_| ())
}

macro_rules! impl_calibrator {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Calibrator for $ty {
                fn module(&self) -> &'static str {
                    <$ty as ModuleCalibrator>::MODULE
                }

                fn calibrate_metrics(&self, operator_id: &str, metrics: &[PhotoMetrics]) -> Result<(), CalibrationError> {
                    run_module(self, operator_id, metrics)
                }
            }
        )+
    };
}

impl_calibrator!(
    fatigue::FatigueCalibration,
    yawn::YawnCalibration,
    distraction::DistractionCalibration,
    behavior::BehaviorCalibration,
    face_recognition::FaceRecognitionCalibration,
);

#[cfg(test)]
pub(crate) mod test_support {
    use crate::metrics::PhotoMetrics;
    use camera_capture::landmarks::synthetic_face;

    /// Photos of the synthetic face with the given eye openings and light levels
    pub(crate) fn photos(ears: &[f64], light: f64) -> Vec<PhotoMetrics> {
        ears.iter()
            .map(|&ear| PhotoMetrics::extract(&synthetic_face(ear, 0.0), light))
            .collect()
    }
}
