//! Master calibration: photos in, per-module baselines out
//!
//! The manager runs landmark detection once per photo, writes the
//! master baseline and hands the same metrics to every registered module
//! calibrator. A run succeeds when at least one module produced a file.

use crate::baseline::{MasterBaseline, QualityMetrics, MASTER_FILE};
use crate::metrics::PhotoMetrics;
use crate::modules::analysis::AnalysisCalibration;
use crate::modules::behavior::BehaviorCalibration;
use crate::modules::distraction::DistractionCalibration;
use crate::modules::face_recognition::FaceRecognitionCalibration;
use crate::modules::fatigue::FatigueCalibration;
use crate::modules::yawn::YawnCalibration;
use crate::modules::Calibrator;
use crate::{BaselineStore, CalibrationError};
use camera_capture::{LandmarkDetector, VideoFrame};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Photos needed before any baseline is written
pub const MIN_PHOTOS: usize = 2;
/// File that marks a directory as an operator photo set
pub const INFO_FILE: &str = "info.txt";

const PHOTO_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const NAME_PREFIX: &str = "Operador:";
const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub operator_id: String,
    pub operator_name: String,
    pub photos_processed: usize,
    pub modules_calibrated: Vec<String>,
    pub modules_failed: Vec<String>,
    pub quality: QualityMetrics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationSummary {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
    pub total_processed: usize,
}

pub struct MasterCalibrationManager<D: LandmarkDetector> {
    store: BaselineStore,
    detector: D,
    model_used: String,
    calibrators: Vec<Box<dyn Calibrator>>,
}

impl<D: LandmarkDetector> MasterCalibrationManager<D> {
    pub fn new(operators_dir: impl AsRef<Path>, detector: D) -> Self {
        let store = BaselineStore::new(operators_dir);
        let calibrators: Vec<Box<dyn Calibrator>> = vec![
            Box::new(FatigueCalibration::new(store.clone())),
            Box::new(YawnCalibration::new(store.clone())),
            Box::new(DistractionCalibration::new(store.clone())),
            Box::new(BehaviorCalibration::new(store.clone())),
            Box::new(FaceRecognitionCalibration::new(store.clone())),
            Box::new(AnalysisCalibration::new(store.clone())),
        ];
        Self {
            store,
            detector,
            model_used: "landmarks_68".to_string(),
            calibrators,
        }
    }

    /// Name recorded in the master baseline
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_used = name.into();
        self
    }

    pub fn store(&self) -> &BaselineStore {
        &self.store
    }

    pub fn modules(&self) -> Vec<&'static str> {
        self.calibrators.iter().map(|c| c.module()).collect()
    }

    /// Calibrate every operator directory under `photos_root` that has an `info.txt`
    pub fn calibrate_all_operators(&mut self, photos_root: impl AsRef<Path>) -> CalibrationSummary {
        let photos_root = photos_root.as_ref();
        let mut summary = CalibrationSummary::default();

        let entries = match fs::read_dir(photos_root) {
            Ok(e) => e,
            Err(e) => {
                warn!("Photos directory {} unavailable: {}", photos_root.display(), e);
                return summary;
            }
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let info = dir.join(INFO_FILE);
            if !info.is_file() {
                debug!("Skipping {}: no {}", dir.display(), INFO_FILE);
                continue;
            }
            let Some(operator_id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let name = read_operator_name(&info);

            summary.total_processed += 1;
            match self.calibrate_operator(&operator_id, &dir, &name) {
                Ok(report) => {
                    info!(
                        "Operator {} ({}) calibrated: {} photos, modules {:?}",
                        operator_id, name, report.photos_processed, report.modules_calibrated
                    );
                    summary.successful.push(operator_id);
                }
                Err(e) => {
                    error!("Calibration failed for {}: {}", operator_id, e);
                    summary.failed.push(operator_id);
                }
            }
        }

        info!(
            "Calibration finished: {} ok, {} failed, {} processed",
            summary.successful.len(),
            summary.failed.len(),
            summary.total_processed
        );
        summary
    }

    pub fn calibrate_operator(
        &mut self,
        operator_id: &str,
        photos_path: impl AsRef<Path>,
        operator_name: &str,
    ) -> Result<CalibrationReport, CalibrationError> {
        let metrics = self.collect_metrics(photos_path.as_ref())?;
        self.calibrate_from_metrics(operator_id, operator_name, &metrics)
    }

    /// Detect landmarks on every photo, skipping unreadable and faceless ones
    pub fn collect_metrics(&mut self, photos_path: &Path) -> Result<Vec<PhotoMetrics>, CalibrationError> {
        let photos = list_photos(photos_path)?;
        if photos.is_empty() {
            return Err(CalibrationError::NoPhotos(photos_path.display().to_string()));
        }

        let mut metrics = Vec::with_capacity(photos.len());
        for photo in &photos {
            let frame = match VideoFrame::from_image_path(photo) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Skipping unreadable photo {}: {}", photo.display(), e);
                    continue;
                }
            };
            match self.detector.detect(&frame) {
                Ok(Some(face)) => metrics.push(PhotoMetrics::extract(&face, frame.mean_brightness())),
                Ok(None) => warn!("No face found in {}", photo.display()),
                Err(e) => warn!("Landmark detection failed on {}: {}", photo.display(), e),
            }
        }
        debug!("{} of {} photos usable in {}", metrics.len(), photos.len(), photos_path.display());
        Ok(metrics)
    }

    pub fn calibrate_from_metrics(
        &self,
        operator_id: &str,
        operator_name: &str,
        metrics: &[PhotoMetrics],
    ) -> Result<CalibrationReport, CalibrationError> {
        if metrics.len() < MIN_PHOTOS {
            return Err(CalibrationError::InsufficientPhotos {
                found: metrics.len(),
                required: MIN_PHOTOS,
            });
        }

        let master = MasterBaseline::build(operator_id, operator_name, &self.model_used, metrics);
        self.store.save(operator_id, MASTER_FILE, &master)?;

        let mut modules_calibrated = Vec::new();
        let mut modules_failed = Vec::new();
        for calibrator in &self.calibrators {
            match calibrator.calibrate_metrics(operator_id, metrics) {
                Ok(()) => modules_calibrated.push(calibrator.module().to_string()),
                Err(e) => {
                    warn!("{} calibration failed for {}: {}", calibrator.module(), operator_id, e);
                    modules_failed.push(calibrator.module().to_string());
                }
            }
        }
        if modules_calibrated.is_empty() {
            return Err(CalibrationError::NoModuleCalibrated(operator_id.to_string()));
        }

        Ok(CalibrationReport {
            operator_id: operator_id.to_string(),
            operator_name: operator_name.to_string(),
            photos_processed: metrics.len(),
            modules_calibrated,
            modules_failed,
            quality: master.quality_metrics,
        })
    }

    pub fn load_master_baseline(&self, operator_id: &str) -> Option<MasterBaseline> {
        self.store.load_or_none(operator_id, MASTER_FILE)
    }
}

fn list_photos(dir: &Path) -> Result<Vec<PathBuf>, CalibrationError> {
    let entries = fs::read_dir(dir).map_err(|e| CalibrationError::Io(e.to_string()))?;
    let mut photos: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    photos.sort();
    Ok(photos)
}

/// First line of `info.txt`, without the "Operador:" prefix.
/// "Unknown" only when the file cannot be read.
pub fn read_operator_name(info: &Path) -> String {
    let Ok(contents) = fs::read_to_string(info) else {
        return UNKNOWN_NAME.to_string();
    };
    let line = contents.lines().next().unwrap_or_default().trim();
    match line.strip_prefix(NAME_PREFIX) {
        Some(name) => name.trim().to_string(),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::fatigue::FatigueThresholds;
    use crate::modules::ModuleCalibrator;
    use crate::store::tests::scratch_dir;
    use camera_capture::landmarks::synthetic_face;
    use camera_capture::{CameraError, FaceLandmarks};
    use image::{Rgb, RgbImage};

    /// Finds the synthetic face in bright photos, nothing in dark ones
    struct BrightFaceDetector;

    impl LandmarkDetector for BrightFaceDetector {
        fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceLandmarks>, CameraError> {
            if frame.mean_brightness() > 20.0 {
                Ok(Some(synthetic_face(0.3, 0.0)))
            } else {
                Ok(None)
            }
        }
    }

    fn write_photo(dir: &Path, name: &str, level: u8) {
        RgbImage::from_pixel(32, 32, Rgb([level, level, level]))
            .save(dir.join(name))
            .unwrap();
    }

    fn operator_dir(root: &Path, id: &str, info: Option<&str>, levels: &[u8]) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        if let Some(info) = info {
            fs::write(dir.join(INFO_FILE), info).unwrap();
        }
        for (i, level) in levels.iter().enumerate() {
            write_photo(&dir, &format!("photo_{}.png", i), *level);
        }
        dir
    }

    #[test]
    fn test_calibrate_operator_writes_all_baselines() {
        let root = scratch_dir("master");
        let photos = operator_dir(&root.join("photos"), "op1", None, &[120, 130, 5]);
        fs::write(photos.join("broken.jpg"), b"not an image").unwrap();

        let mut manager = MasterCalibrationManager::new(root.join("operators"), BrightFaceDetector);
        let report = manager.calibrate_operator("op1", &photos, "Ana").unwrap();

        assert_eq!(report.photos_processed, 2);
        assert_eq!(report.modules_calibrated.len(), 6);
        assert!(report.modules_failed.is_empty());

        let master = manager.load_master_baseline("op1").unwrap();
        assert_eq!(master.operator_name, "Ana");
        assert_eq!(master.calibration_info.photos_processed, 2);

        let fatigue = FatigueCalibration::new(manager.store().clone());
        let t = fatigue.get_thresholds("op1");
        assert_ne!(t, FatigueThresholds::default());
        assert_eq!(t.calibration_confidence, 0.5);
    }

    #[test]
    fn test_too_few_usable_photos() {
        let root = scratch_dir("master-few");
        let photos = operator_dir(&root, "op", None, &[120, 5, 6]);
        let mut manager = MasterCalibrationManager::new(root.join("operators"), BrightFaceDetector);
        let err = manager.calibrate_operator("op", &photos, "x").unwrap_err();
        assert!(matches!(err, CalibrationError::InsufficientPhotos { found: 1, required: 2 }));
        assert!(manager.load_master_baseline("op").is_none());
    }

    #[test]
    fn test_empty_directory() {
        let root = scratch_dir("master-empty");
        let photos = operator_dir(&root, "op", None, &[]);
        let mut manager = MasterCalibrationManager::new(root.join("operators"), BrightFaceDetector);
        assert!(matches!(
            manager.calibrate_operator("op", &photos, "x"),
            Err(CalibrationError::NoPhotos(_))
        ));
    }

    #[test]
    fn test_calibrate_all_operators() {
        let root = scratch_dir("master-all");
        let photos_root = root.join("photos");
        operator_dir(&photos_root, "a", Some("Operador: Ana Ruiz\nshift 2"), &[120, 140]);
        operator_dir(&photos_root, "b", Some(""), &[120]);
        operator_dir(&photos_root, "c", None, &[120, 140]);

        let mut manager = MasterCalibrationManager::new(root.join("operators"), BrightFaceDetector);
        let summary = manager.calibrate_all_operators(&photos_root);

        assert_eq!(summary.successful, vec!["a".to_string()]);
        assert_eq!(summary.failed, vec!["b".to_string()]);
        assert_eq!(summary.total_processed, 2);
        assert_eq!(manager.load_master_baseline("a").unwrap().operator_name, "Ana Ruiz");
    }

    #[test]
    fn test_missing_photos_root() {
        let root = scratch_dir("master-missing");
        let mut manager = MasterCalibrationManager::new(root.join("operators"), BrightFaceDetector);
        let summary = manager.calibrate_all_operators(root.join("nope"));
        assert_eq!(summary.total_processed, 0);
    }

    #[test]
    fn test_operator_name_fallback() {
        let dir = scratch_dir("master-name");
        fs::create_dir_all(&dir).unwrap();
        let info = dir.join(INFO_FILE);
        assert_eq!(read_operator_name(&dir.join("missing.txt")), "Unknown");
        fs::write(&info, "Luis").unwrap();
        assert_eq!(read_operator_name(&info), "Luis");
        fs::write(&info, "Operador: Ana Ruiz\nturno: noche\n").unwrap();
        assert_eq!(read_operator_name(&info), "Ana Ruiz");
    }

    #[test]
    fn test_blank_operator_name_stays_blank() {
        let dir = scratch_dir("master-blank-name");
        fs::create_dir_all(&dir).unwrap();
        let info = dir.join(INFO_FILE);
        fs::write(&info, "Operador:   \n").unwrap();
        assert_eq!(read_operator_name(&info), "");
        fs::write(&info, "").unwrap();
        assert_eq!(read_operator_name(&info), "");
    }
}
