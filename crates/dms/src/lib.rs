//! Driver Monitoring System (DMS)
//!
//! Per-frame operator state analysis from facial landmarks and object
//! detections:
//! - Eye closure, blinks and microsleeps (fatigue)
//! - Yawns, with smile filtering
//! - Extreme head rotation (distraction)
//! - Phone and cigarette use near the face (behavior)
//!
//! Detectors never touch audio or disk. Each frame's alerts, audio cues
//! and report requests come back in [`DmsAnalysis`] for the caller to act on.

pub mod analysis;
pub mod behavior;
pub mod config;
pub mod detector;
pub mod distraction;
pub mod fatigue;
pub mod state;
pub mod yawn;

pub use analysis::{DetectorKind, DmsAlert, DmsAnalysis, Emitted, ReportRequest, Severity};
pub use behavior::{BehaviorMonitor, BoundingBox, ObjectDetection};
pub use config::DmsConfig;
pub use detector::{LandmarkModel, ObjectModel};
pub use distraction::DistractionMonitor;
pub use fatigue::FatigueMonitor;
pub use yawn::YawnMonitor;

use calibration::OperatorThresholds;
use camera_capture::{FaceLandmarks, VideoFrame};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Keypoints missing from model output")]
    KeypointsMissing,
}

/// Which detectors run on a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorSchedule {
    pub fatigue: bool,
    pub yawn: bool,
    pub distraction: bool,
    pub behavior: bool,
}

impl DetectorSchedule {
    pub fn all() -> Self {
        Self {
            fatigue: true,
            yawn: true,
            distraction: true,
            behavior: true,
        }
    }
}

impl Default for DetectorSchedule {
    fn default() -> Self {
        Self::all()
    }
}

/// Driver monitoring module
pub struct DmsModule {
    config: DmsConfig,
    operator_id: Option<String>,
    fatigue: FatigueMonitor,
    yawn: YawnMonitor,
    distraction: DistractionMonitor,
    behavior: BehaviorMonitor,
}

impl DmsModule {
    /// Create a DMS module with default thresholds until an operator is set
    pub fn new(config: DmsConfig) -> Self {
        let thresholds = OperatorThresholds::default();
        let cooldown = config.report_cooldown_secs;
        Self {
            fatigue: FatigueMonitor::new(thresholds.fatigue, cooldown),
            yawn: YawnMonitor::new(thresholds.yawn, cooldown),
            distraction: DistractionMonitor::new(thresholds.distraction, cooldown),
            behavior: BehaviorMonitor::new(thresholds.behavior, cooldown),
            operator_id: None,
            config,
        }
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    pub fn operator_id(&self) -> Option<&str> {
        self.operator_id.as_deref()
    }

    /// Apply an operator's thresholds. Detector state is reset only when the
    /// operator changes; the same operator just picks up fresh thresholds.
    pub fn set_operator(&mut self, operator_id: &str, thresholds: &OperatorThresholds) {
        if self.operator_id.as_deref() == Some(operator_id) {
            debug!("DMS reloading thresholds for operator {}", operator_id);
        } else {
            info!("DMS switching to operator {}", operator_id);
            self.reset_state();
        }
        self.fatigue.set_thresholds(thresholds.fatigue.clone());
        self.yawn.set_thresholds(thresholds.yawn.clone());
        self.distraction.set_thresholds(thresholds.distraction.clone());
        self.behavior.set_thresholds(thresholds.behavior.clone());
        self.operator_id = Some(operator_id.to_string());
    }

    /// Advance the behavior frame counter; true when objects should be detected
    pub fn wants_objects(&mut self) -> bool {
        self.behavior.tick()
    }

    /// Minimum object confidence for the current lighting
    pub fn object_confidence(&self) -> f32 {
        self.behavior.detector().confidence_threshold()
    }

    pub fn fatigue(&self) -> &FatigueMonitor {
        &self.fatigue
    }

    pub fn yawn(&self) -> &YawnMonitor {
        &self.yawn
    }

    pub fn yawn_mut(&mut self) -> &mut YawnMonitor {
        &mut self.yawn
    }

    pub fn distraction(&self) -> &DistractionMonitor {
        &self.distraction
    }

    pub fn behavior(&self) -> &BehaviorMonitor {
        &self.behavior
    }

    /// Analyze a single frame; `objects` is `None` when detection was skipped
    pub fn analyze(
        &mut self,
        frame: &VideoFrame,
        landmarks: Option<&FaceLandmarks>,
        objects: Option<&[ObjectDetection]>,
        schedule: DetectorSchedule,
    ) -> DmsAnalysis {
        let now = frame.timestamp_secs();
        let light = frame.mean_brightness();
        let mut out = Emitted::default();

        let fatigue = schedule
            .fatigue
            .then(|| self.fatigue.process(landmarks, light, now, &mut out));
        let yawn = schedule
            .yawn
            .then(|| self.yawn.process(landmarks, light, now, &mut out));
        let distraction = schedule
            .distraction
            .then(|| self.distraction.process(landmarks, light, now, &mut out));
        let behavior = schedule.behavior.then(|| {
            self.behavior
                .process(objects, landmarks.map(|l| &l.rect), light, now, &mut out)
        });

        DmsAnalysis {
            face_detected: landmarks.is_some(),
            light_level: light,
            fatigue,
            yawn,
            distraction,
            behavior,
            alerts: out.alerts,
            audio: out.audio,
            reports: out.reports,
        }
    }

    /// Reset driver state (on driver change)
    pub fn reset_state(&mut self) {
        self.fatigue.reset();
        self.yawn.reset();
        self.distraction.reset();
        self.behavior.reset();
    }
}
