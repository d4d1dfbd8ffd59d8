//! Per-frame orchestration
//!
//! Landmarks are found once per frame and shared. Face recognition decides
//! who is at the controls; the detectors and the integrated analysis only
//! run while a registered operator is in front of the camera. Alarms and
//! reports requested by any layer are played and written here; reports are
//! held until the frame's dashboard is drawn so their images carry it.

use crate::config::AppConfig;
use crate::dashboard::{Dashboard, DashboardView};
use crate::scheduler::{Detector, FrameScheduler};
use alerting::{AlarmPlayer, AudioCue};
use anyhow::Context;
use calibration::{AnalysisCalibration, BaselineStore, FaceRecognitionThresholds, OperatorThresholds};
use camera_capture::{CameraError, FaceLandmarks, FaceRect, LandmarkDetector, VideoFrame, WebcamCapture};
use dms::{DetectorSchedule, DmsAnalysis, DmsModule, LandmarkModel, ObjectDetection, ObjectModel};
use driver_auth::{
    AuthError, CurrentOperator, EmbeddingModel, FaceEmbedding, FaceRecognizer, Identity, OperatorRegistry,
    OperatorSession, UNKNOWN_OPERATOR_EVENT,
};
use operator_analysis::{IntegratedAnalysis, OperatorAnalyzer, REPORT_MODULE};
use serde::Serialize;
use storage::{ReportManager, ReportOperator};
use tracing::{debug, error, info, warn};

/// Module unknown-operator reports are filed under
pub const OPERATORS_MODULE: &str = "operators";

pub trait FrameSource {
    fn next_frame(&mut self) -> Result<VideoFrame, CameraError>;
}

impl FrameSource for WebcamCapture {
    fn next_frame(&mut self) -> Result<VideoFrame, CameraError> {
        WebcamCapture::next_frame(self)
    }
}

/// Face crop to identity embedding
pub trait FaceEmbedder {
    fn embed(&self, frame: &VideoFrame, face: &FaceRect) -> Result<FaceEmbedding, AuthError>;
}

impl FaceEmbedder for EmbeddingModel {
    fn embed(&self, frame: &VideoFrame, face: &FaceRect) -> Result<FaceEmbedding, AuthError> {
        EmbeddingModel::embed(self, frame, face)
    }
}

pub trait ObjectDetector {
    fn detect(&self, frame: &VideoFrame, min_confidence: f32) -> Result<Vec<ObjectDetection>, dms::DmsError>;
}

impl ObjectDetector for ObjectModel {
    fn detect(&self, frame: &VideoFrame, min_confidence: f32) -> Result<Vec<ObjectDetection>, dms::DmsError> {
        ObjectModel::detect(self, frame, min_confidence)
    }
}

/// Report requested during a frame, written once the frame is finished
#[derive(Debug)]
struct PendingReport {
    module: String,
    event_type: String,
    data: serde_json::Value,
    with_frame: bool,
    operator: Option<ReportOperator>,
}

/// The inference models a pipeline runs
pub struct Models {
    pub landmarks: Box<dyn LandmarkDetector>,
    pub objects: Option<Box<dyn ObjectDetector>>,
    /// Without an embedder every face is monitored with default thresholds
    pub embedder: Option<Box<dyn FaceEmbedder>>,
}

impl Models {
    pub fn load(config: &AppConfig) -> anyhow::Result<Self> {
        let landmarks = LandmarkModel::from_config(&config.dms).context("loading landmark model")?;
        let objects = ObjectModel::from_config(&config.dms).context("loading object model")?;
        if objects.is_none() {
            warn!("No object model configured; phone and cigarette detection disabled");
        }
        let embedder = EmbeddingModel::from_config(&config.auth).context("loading embedding model")?;
        if embedder.is_none() {
            warn!("No embedding model configured; operators will not be identified");
        }
        Ok(Self {
            landmarks: Box::new(landmarks),
            objects: objects.map(|m| Box::new(m) as Box<dyn ObjectDetector>),
            embedder: embedder.map(|m| Box::new(m) as Box<dyn FaceEmbedder>),
        })
    }
}

/// What happened on one frame
#[derive(Debug, Default, Serialize)]
pub struct FrameOutcome {
    pub frame: u64,
    pub level: u8,
    pub face_detected: bool,
    pub operator: Option<CurrentOperator>,
    pub dms: Option<DmsAnalysis>,
    pub analysis: Option<IntegratedAnalysis>,
    pub reports_written: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub faces_detected: u64,
    pub operator_changes: u64,
    pub reports_written: u64,
    pub reports_failed: u64,
}

pub struct Pipeline {
    scheduler: FrameScheduler,
    models: Models,
    registry: OperatorRegistry,
    recognizer: FaceRecognizer,
    session: OperatorSession,
    store: BaselineStore,
    analysis_baselines: AnalysisCalibration,
    dms: DmsModule,
    analyzer: OperatorAnalyzer,
    alarms: AlarmPlayer,
    reports: ReportManager,
    dashboard: Dashboard,
    pending: Vec<PendingReport>,
    operator: Option<CurrentOperator>,
    frame_count: u64,
    stats: PipelineStats,
}

impl Pipeline {
    /// Pipeline on the configured models, registry and audio device
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let models = Models::load(config)?;
        let registry = OperatorRegistry::load(&config.auth.encodings_file).context("loading operator registry")?;
        let scheduler = FrameScheduler::from_system(&config.scheduler, config.profile);
        let alarms = AlarmPlayer::new(config.alarms.clone());
        Self::with_parts(config, models, registry, scheduler, alarms)
    }

    pub fn with_parts(
        config: &AppConfig,
        models: Models,
        registry: OperatorRegistry,
        scheduler: FrameScheduler,
        alarms: AlarmPlayer,
    ) -> anyhow::Result<Self> {
        let reports = ReportManager::new(config.storage.clone()).context("preparing report directories")?;
        let store = BaselineStore::new(&config.paths.operators_dir);
        info!(
            "Pipeline ready: {} registered operators, baselines in {}",
            registry.len(),
            store.root().display()
        );
        Ok(Self {
            scheduler,
            models,
            registry,
            recognizer: FaceRecognizer::new(FaceRecognitionThresholds::default()),
            session: OperatorSession::new(&config.auth, 0.0),
            analysis_baselines: AnalysisCalibration::new(store.clone()),
            store,
            dms: DmsModule::new(config.dms.clone()),
            analyzer: OperatorAnalyzer::new(config.analysis.clone()),
            alarms,
            reports,
            dashboard: Dashboard::new(config.dashboard.clone()),
            pending: Vec::new(),
            operator: None,
            frame_count: 0,
            stats: PipelineStats::default(),
        })
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn reports(&self) -> &ReportManager {
        &self.reports
    }

    pub fn operator(&self) -> Option<&CurrentOperator> {
        self.operator.as_ref()
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn process(&mut self, frame: &VideoFrame) -> FrameOutcome {
        self.frame_count += 1;
        self.stats.frames_processed += 1;
        let now = frame.timestamp_secs();
        let n = self.frame_count;
        let level = self.scheduler.refresh(now);
        let skipped_before = self.scheduler.stats().detections_skipped;

        let landmarks = match self.models.landmarks.detect(frame) {
            Ok(l) => l,
            Err(e) => {
                warn!("Landmark detection failed: {}", e);
                None
            }
        };
        if landmarks.is_some() {
            self.stats.faces_detected += 1;
        }

        let mut outcome = FrameOutcome {
            frame: n,
            level,
            face_detected: landmarks.is_some(),
            ..Default::default()
        };

        if self.models.embedder.is_some() {
            if self.scheduler.should_run(Detector::FaceRecognition, n) {
                self.recognize(frame, landmarks.as_ref(), now);
            }
        } else if self.operator.is_none() && landmarks.is_some() {
            self.operator = Some(CurrentOperator {
                id: "default".to_string(),
                name: "Operator".to_string(),
                confidence: 0.0,
            });
        }
        outcome.operator = self.operator.clone();

        if let Some(landmarks) = landmarks.as_ref().filter(|_| self.operator.is_some()) {
            outcome.dms = Some(self.run_detectors(frame, landmarks, n));
            if self.scheduler.should_run(Detector::Analysis, n) {
                outcome.analysis = Some(self.run_analysis(frame, landmarks, now));
            }
        }
        self.finish_frame(frame, landmarks.as_ref(), now, &mut outcome);

        let skipped = self.scheduler.stats().detections_skipped - skipped_before;
        metrics::counter!("safety_frames_processed_total").increment(1);
        metrics::counter!("safety_detections_skipped_total").increment(skipped);
        metrics::gauge!("safety_optimization_level").set(level as f64);
        outcome
    }

    fn recognize(&mut self, frame: &VideoFrame, landmarks: Option<&FaceLandmarks>, now: f64) {
        let identity = match (landmarks, self.models.embedder.as_ref()) {
            (Some(l), Some(embedder)) => match embedder.embed(frame, &l.rect) {
                Ok(embedding) => Some(self.recognizer.identify(&self.registry, &embedding, frame.mean_brightness())),
                Err(e) => {
                    debug!("Embedding failed: {}", e);
                    return;
                }
            },
            _ => None,
        };

        let update = self.session.update(identity.as_ref(), now);
        self.play(&update.audio);

        if let Some(operator) = update.operator_changed {
            self.apply_operator(&operator);
            self.operator = Some(operator);
        } else if update.operator_left || matches!(identity, Some(Identity::Unknown { .. })) {
            if self.operator.take().is_some() {
                self.analyzer.clear_operator();
            }
        }

        if let Some(report) = update.report {
            let who = ReportOperator {
                id: report.operator_id.to_string(),
                name: report.operator_name.to_string(),
            };
            match serde_json::to_value(&report) {
                Ok(data) => self.queue_report(OPERATORS_MODULE, UNKNOWN_OPERATOR_EVENT, data, true, Some(who)),
                Err(e) => error!("Unknown-operator report not serialisable: {}", e),
            }
        }
    }

    /// Hand the operator's calibrated thresholds to every subsystem
    fn apply_operator(&mut self, operator: &CurrentOperator) {
        info!("Applying thresholds of {} ({})", operator.name, operator.id);
        self.stats.operator_changes += 1;
        metrics::counter!("safety_operator_changes_total").increment(1);

        let thresholds = OperatorThresholds::load(&self.store, &operator.id);
        self.dms.set_operator(&operator.id, &thresholds);
        self.recognizer.set_thresholds(thresholds.face_recognition.clone());
        let baseline = if self.analysis_baselines.load_baseline(&operator.id) {
            self.analysis_baselines.current_baseline()
        } else {
            None
        };
        self.analyzer.set_operator(&operator.id, &operator.name, baseline);
    }

    fn run_detectors(
        &mut self,
        frame: &VideoFrame,
        landmarks: &FaceLandmarks,
        n: u64,
    ) -> DmsAnalysis {
        let schedule = DetectorSchedule {
            fatigue: self.scheduler.should_run(Detector::Fatigue, n),
            behavior: self.scheduler.should_run(Detector::Behavior, n),
            distraction: self.scheduler.should_run(Detector::Distraction, n),
            yawn: self.scheduler.should_run(Detector::Yawn, n),
        };

        let objects = match self.models.objects.as_ref() {
            Some(model) if schedule.behavior && self.dms.wants_objects() => {
                match model.detect(frame, self.dms.object_confidence()) {
                    Ok(found) => Some(found),
                    Err(e) => {
                        warn!("Object detection failed: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let analysis = self.dms.analyze(frame, Some(landmarks), objects.as_deref(), schedule);
        self.play(&analysis.audio);

        let who = self.report_operator();
        for request in &analysis.reports {
            self.queue_report(
                request.detector.as_str(),
                &request.event_type,
                request.data.clone(),
                request.include_frame,
                who.clone(),
            );
        }
        analysis
    }

    fn run_analysis(&mut self, frame: &VideoFrame, landmarks: &FaceLandmarks, now: f64) -> IntegratedAnalysis {
        let analysis = self.analyzer.analyze(frame, Some(landmarks), now);
        let who = self.report_operator();
        for report in &analysis.reports {
            self.queue_report(REPORT_MODULE, report.event_type, report.data.clone(), true, who.clone());
        }
        metrics::gauge!("safety_risk_score").set(analysis.overall.risk_score as f64);
        analysis
    }

    fn report_operator(&self) -> Option<ReportOperator> {
        self.operator.as_ref().map(|op| ReportOperator {
            id: op.id.clone(),
            name: op.name.clone(),
        })
    }

    fn queue_report(
        &mut self,
        module: &str,
        event_type: &str,
        data: serde_json::Value,
        with_frame: bool,
        operator: Option<ReportOperator>,
    ) {
        self.pending.push(PendingReport {
            module: module.to_string(),
            event_type: event_type.to_string(),
            data,
            with_frame,
            operator,
        });
    }

    /// Draw the dashboard when something needs it, then write the queued reports
    fn finish_frame(&mut self, frame: &VideoFrame, landmarks: Option<&FaceLandmarks>, now: f64, outcome: &mut FrameOutcome) {
        let pending = std::mem::take(&mut self.pending);
        let config = self.dashboard.config();
        let snapshot = config
            .snapshot_path
            .clone()
            .filter(|_| config.enabled && config.snapshot_every_frames > 0)
            .filter(|_| outcome.frame % config.snapshot_every_frames == 0);
        let render = config.enabled && (snapshot.is_some() || pending.iter().any(|r| r.with_frame));

        let annotated = {
            let view = DashboardView {
                now,
                level: outcome.level,
                operator: outcome.operator.as_ref(),
                landmarks,
                dms: outcome.dms.as_ref(),
                analysis: outcome.analysis.as_ref(),
            };
            self.dashboard.observe(&view);
            if render {
                match self.dashboard.render(frame, &view) {
                    Ok(annotated) => Some(annotated),
                    Err(e) => {
                        warn!("Dashboard not drawn: {}", e);
                        None
                    }
                }
            } else {
                None
            }
        };

        if let (Some(path), Some(annotated)) = (snapshot, annotated.as_ref()) {
            let saved = annotated
                .to_rgb_image()
                .map_err(|e| e.to_string())
                .and_then(|img| img.save(&path).map_err(|e| e.to_string()));
            if let Err(e) = saved {
                warn!("Dashboard snapshot {} not saved: {}", path.display(), e);
            }
        }

        let image = annotated.as_ref().unwrap_or(frame);
        for report in pending {
            let attached = report.with_frame.then_some(image);
            if self.write_report(&report.module, &report.event_type, report.data, attached, report.operator.as_ref()) {
                outcome.reports_written += 1;
            }
        }
    }

    fn play(&mut self, cues: &[AudioCue]) {
        for cue in cues {
            self.alarms.dispatch(cue);
        }
    }

    fn write_report(
        &mut self,
        module: &str,
        event_type: &str,
        data: serde_json::Value,
        frame: Option<&VideoFrame>,
        operator: Option<&ReportOperator>,
    ) -> bool {
        match self.reports.generate_report(module, event_type, data, frame, operator) {
            Ok(report) => {
                debug!("Report {} written", report.id);
                self.stats.reports_written += 1;
                metrics::counter!("safety_reports_written_total", "module" => module.to_string()).increment(1);
                true
            }
            Err(e) => {
                error!("Failed to write {} report {}: {}", module, event_type, e);
                self.stats.reports_failed += 1;
                false
            }
        }
    }

    /// Pull frames until `keep_running` turns false or the source fails too often
    pub fn run<S: FrameSource>(
        &mut self,
        source: &mut S,
        keep_running: impl Fn() -> bool,
        status_every: u64,
    ) -> anyhow::Result<()> {
        let mut failures = 0u32;
        while keep_running() {
            let frame = match source.next_frame() {
                Ok(f) => {
                    failures = 0;
                    f
                }
                Err(e) => {
                    failures += 1;
                    error!("Frame capture failed ({} in a row): {}", failures, e);
                    if failures >= MAX_CAPTURE_FAILURES {
                        anyhow::bail!("camera stopped delivering frames: {}", e);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    continue;
                }
            };
            let outcome = self.process(&frame);
            if status_every > 0 && outcome.frame % status_every == 0 {
                info!(
                    "Frame {} | level {} | operator {} | reports {} | skipped {}",
                    outcome.frame,
                    outcome.level,
                    outcome.operator.as_ref().map_or("-", |o| o.name.as_str()),
                    self.stats.reports_written,
                    self.scheduler.stats().detections_skipped
                );
            }
        }
        self.alarms.stop();
        info!(
            "Monitor stopped after {} frames ({} reports, {} operator changes)",
            self.stats.frames_processed, self.stats.reports_written, self.stats.operator_changes
        );
        Ok(())
    }
}

const MAX_CAPTURE_FAILURES: u32 = 50;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::scheduler::{ResourceSampler, ResourceSample};
    use alerting::SilentSink;
    use camera_capture::synthetic_face;
    use driver_auth::EMBEDDING_DIM;
    use std::path::PathBuf;

    struct FixedFace(Option<FaceLandmarks>);

    impl LandmarkDetector for FixedFace {
        fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<FaceLandmarks>, CameraError> {
            Ok(self.0.clone())
        }
    }

    struct AxisEmbedder(usize);

    impl FaceEmbedder for AxisEmbedder {
        fn embed(&self, _frame: &VideoFrame, _face: &FaceRect) -> Result<FaceEmbedding, AuthError> {
            Ok(axis(self.0))
        }
    }

    struct Idle;

    impl ResourceSampler for Idle {
        fn sample(&mut self) -> ResourceSample {
            ResourceSample::default()
        }
    }

    struct Frames(u64);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<VideoFrame, CameraError> {
            self.0 += 1;
            Ok(frame_at(self.0 as f64 / 10.0))
        }
    }

    fn axis(i: usize) -> FaceEmbedding {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[i] = 1.0;
        FaceEmbedding::new(v, 1.0).unwrap()
    }

    fn frame_at(secs: f64) -> VideoFrame {
        VideoFrame::filled(640, 480, [170, 120, 100], (secs * 1e9) as u64)
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("safety-monitor-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: &PathBuf) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.operators_dir = dir.join("baselines");
        config.storage.reports_dir = dir.join("reports");
        config.storage.save_images = false;
        config.alarms.enabled = false;
        config.dashboard.font_path = None;
        config
    }

    fn pipeline(dir: &PathBuf, face: Option<FaceLandmarks>, embedder: Option<usize>) -> Pipeline {
        pipeline_with(config(dir), dir, face, embedder)
    }

    fn pipeline_with(config: AppConfig, dir: &PathBuf, face: Option<FaceLandmarks>, embedder: Option<usize>) -> Pipeline {
        let mut registry = OperatorRegistry::new(dir.join("encodings.json"));
        registry.enroll("OP1", "Ana", vec![axis(0)]).unwrap();
        let models = Models {
            landmarks: Box::new(FixedFace(face)),
            objects: None,
            embedder: embedder.map(|i| Box::new(AxisEmbedder(i)) as Box<dyn FaceEmbedder>),
        };
        let scheduler = FrameScheduler::new(&config.scheduler, Profile::Development, Box::new(Idle));
        let alarms = AlarmPlayer::with_sink(config.alarms.clone(), Box::new(SilentSink));
        Pipeline::with_parts(&config, models, registry, scheduler, alarms).unwrap()
    }

    #[test]
    fn test_registered_operator_runs_every_detector() {
        let dir = scratch_dir();
        let mut p = pipeline(&dir, Some(synthetic_face(0.3, 0.0)), Some(0));
        let outcome = p.process(&frame_at(0.1));
        assert!(outcome.face_detected);
        assert_eq!(outcome.operator.as_ref().map(|o| o.id.as_str()), Some("OP1"));
        let dms = outcome.dms.unwrap();
        assert!(dms.fatigue.is_some() && dms.yawn.is_some() && dms.distraction.is_some());
        assert!(outcome.analysis.is_some());
        assert_eq!(p.stats().operator_changes, 1);

        p.process(&frame_at(0.2));
        assert_eq!(p.stats().operator_changes, 1);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unknown_face_is_not_monitored() {
        let dir = scratch_dir();
        let mut p = pipeline(&dir, Some(synthetic_face(0.3, 0.0)), Some(5));
        let outcome = p.process(&frame_at(0.1));
        assert!(outcome.face_detected);
        assert!(outcome.operator.is_none());
        assert!(outcome.dms.is_none());
        assert!(outcome.analysis.is_none());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unknown_operator_report_after_threshold() {
        let dir = scratch_dir();
        let mut p = pipeline(&dir, Some(synthetic_face(0.3, 0.0)), Some(5));
        p.process(&frame_at(1.0));
        let outcome = p.process(&frame_at(1.0 + 15.0 * 60.0));
        assert_eq!(outcome.reports_written, 1);
        let recent = p.reports().recent_for(OPERATORS_MODULE, Some(UNKNOWN_OPERATOR_EVENT), 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].operator.as_ref().map(|o| o.id.as_str()), Some("UNKNOWN"));

        // filed once per presence
        let outcome = p.process(&frame_at(2.0 + 15.0 * 60.0));
        assert_eq!(outcome.reports_written, 0);
        std::fs::remove_dir_all(dir).ok();
    }

    fn unknown_report_image(dashboard: bool) -> image::RgbImage {
        let dir = scratch_dir();
        let mut config = config(&dir);
        config.storage.save_images = true;
        config.dashboard.enabled = dashboard;
        let mut p = pipeline_with(config, &dir, Some(synthetic_face(0.3, 0.0)), Some(5));
        p.process(&frame_at(1.0));
        assert_eq!(p.process(&frame_at(1.0 + 15.0 * 60.0)).reports_written, 1);

        let recent = p.reports().recent_for(OPERATORS_MODULE, Some(UNKNOWN_OPERATOR_EVENT), 1).unwrap();
        let path = recent[0].image_path.clone().expect("report image");
        let img = image::open(&path).unwrap().to_rgb8();
        std::fs::remove_dir_all(dir).ok();
        img
    }

    fn close_to(p: &image::Rgb<u8>, expected: [u8; 3]) -> bool {
        p.0.iter().zip(expected).all(|(&a, b)| (a as i32 - b as i32).abs() <= 12)
    }

    #[test]
    fn test_report_image_carries_dashboard() {
        let img = unknown_report_image(true);
        // inside the left panel, below the last section
        assert!(img.get_pixel(20, 460).0.iter().all(|&c| c < 70));
        // untouched camera pixels
        assert!(close_to(img.get_pixel(500, 440), [170, 120, 100]));
    }

    #[test]
    fn test_report_image_plain_when_dashboard_disabled() {
        let img = unknown_report_image(false);
        assert!(close_to(img.get_pixel(20, 460), [170, 120, 100]));
    }

    #[test]
    fn test_dashboard_snapshot_written() {
        let dir = scratch_dir();
        let mut config = config(&dir);
        let snapshot = dir.join("dashboard.jpg");
        config.dashboard.snapshot_path = Some(snapshot.clone());
        config.dashboard.snapshot_every_frames = 2;
        let mut p = pipeline_with(config, &dir, Some(synthetic_face(0.3, 0.0)), Some(0));

        p.process(&frame_at(0.1));
        assert!(!snapshot.exists());
        p.process(&frame_at(0.2));
        let img = image::open(&snapshot).unwrap().to_rgb8();
        assert_eq!((img.width(), img.height()), (640, 480));
        assert!(img.get_pixel(20, 460).0.iter().all(|&c| c < 70));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_operator_leaving_stops_monitoring() {
        let dir = scratch_dir();
        let mut p = pipeline(&dir, Some(synthetic_face(0.3, 0.0)), Some(0));
        p.process(&frame_at(0.1));
        assert!(p.operator().is_some());

        p.models.landmarks = Box::new(FixedFace(None));
        let outcome = p.process(&frame_at(0.2));
        assert!(!outcome.face_detected);
        assert!(outcome.operator.is_none());
        assert!(outcome.dms.is_none());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_without_embedder_faces_use_defaults() {
        let dir = scratch_dir();
        let mut p = pipeline(&dir, Some(synthetic_face(0.3, 0.0)), None);
        let outcome = p.process(&frame_at(0.1));
        assert!(outcome.dms.is_some());
        assert_eq!(p.stats().operator_changes, 0);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_run_stops_when_asked() {
        let dir = scratch_dir();
        let mut p = pipeline(&dir, Some(synthetic_face(0.3, 0.0)), Some(0));
        let mut source = Frames(0);
        let budget = std::cell::Cell::new(25);
        p.run(
            &mut source,
            || {
                budget.set(budget.get() - 1);
                budget.get() >= 0
            },
            10,
        )
        .unwrap();
        assert_eq!(p.stats().frames_processed, 25);
        assert_eq!(p.stats().faces_detected, 25);
        std::fs::remove_dir_all(dir).ok();
    }
}
