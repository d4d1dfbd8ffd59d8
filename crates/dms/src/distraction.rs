//! Extreme head-rotation distraction
//!
//! Only turns far enough that the face profile shows count; small
//! glances never raise an alert.

use crate::analysis::{DetectorKind, Emitted, Severity};
use crate::state::{EventWindow, Lighting};
use alerting::{AudioCue, CooldownConfig, CooldownManager};
use calibration::DistractionThresholds;
use camera_capture::FaceLandmarks;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// Continuous time back at centre that ends a distraction (seconds)
pub const CENTER_RESET_SECS: f64 = 0.75;
/// Level-2 distractions in the window that count as repeated
pub const MULTIPLE_DISTRACTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Center,
    Extreme,
    NoFace,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Jaw-based rotation measurements
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RotationGeometry {
    pub aspect_ratio: f64,
    pub ear_visibility: f64,
    pub eye_visibility: f64,
    pub nose_offset: f64,
    pub extreme: bool,
    #[serde(skip)]
    pub side: Option<Side>,
}

pub fn rotation_geometry(landmarks: &FaceLandmarks) -> RotationGeometry {
    let jaw = landmarks.jaw();
    let left = jaw.iter().map(|p| p.x).fold(f64::MAX, f64::min);
    let right = jaw.iter().map(|p| p.x).fold(f64::MIN, f64::max);
    let width = right - left;
    let height = landmarks.point(8).y - landmarks.point(19).y;
    let center_x = (left + right) / 2.0;

    let ratio = |num: f64, den: f64, fallback: f64| if den > 0.0 { num / den } else { fallback };

    let ear_visibility = ratio(
        (jaw[0].x - center_x).abs().max((jaw[16].x - center_x).abs()),
        width,
        0.0,
    );
    let aspect_ratio = ratio(width, height, 1.0);
    let eye_visibility = ratio(landmarks.point(36).distance(&landmarks.point(45)), width * 0.6, 1.0);
    let nose_x = landmarks.point(30).x;
    let nose_offset = ratio((nose_x - center_x).abs(), width, 0.0);

    let extreme =
        (aspect_ratio < 0.5 || eye_visibility < 0.5 || nose_offset > 0.4) && ear_visibility > 0.45;
    let side = extreme.then(|| if nose_x < center_x { Side::Left } else { Side::Right });

    RotationGeometry {
        aspect_ratio,
        ear_visibility,
        eye_visibility,
        nose_offset,
        extreme,
        side,
    }
}

/// Per-frame distraction result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistractionResult {
    pub direction: Direction,
    pub side: Option<Side>,
    pub confidence: f64,
    pub is_distracted: bool,
    /// 0 none, 1 first warning, 2 prolonged
    pub alert_level: u8,
    pub distraction_secs: f64,
    pub distraction_count: usize,
    pub multiple_distractions: bool,
    pub is_night_mode: bool,
    pub light_level: f64,
}

#[derive(Debug, Clone)]
pub struct DistractionDetector {
    thresholds: DistractionThresholds,
    lighting: Lighting,
    direction: Direction,
    last_known: Direction,
    side: Option<Side>,
    confidence: f64,
    frames_without_face: u32,
    last_geometry: Option<RotationGeometry>,
    started: Option<f64>,
    center_since: Option<f64>,
    level1_fired: bool,
    level2_fired: bool,
    alert_level: u8,
    distractions: EventWindow,
}

impl DistractionDetector {
    pub fn new(thresholds: DistractionThresholds) -> Self {
        Self {
            lighting: Lighting::new(thresholds.night_mode_threshold, thresholds.enable_night_mode),
            distractions: EventWindow::new(thresholds.distraction_window),
            thresholds,
            direction: Direction::Center,
            last_known: Direction::Center,
            side: None,
            confidence: 1.0,
            frames_without_face: 0,
            last_geometry: None,
            started: None,
            center_since: None,
            level1_fired: false,
            level2_fired: false,
            alert_level: 0,
        }
    }

    pub fn set_thresholds(&mut self, thresholds: DistractionThresholds) {
        info!(
            "Distraction thresholds updated: level1 {:.0}s, level2 {:.0}s",
            thresholds.level1_time, thresholds.level2_time
        );
        self.lighting
            .set_threshold(thresholds.night_mode_threshold, thresholds.enable_night_mode);
        self.distractions.set_window(thresholds.distraction_window);
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &DistractionThresholds {
        &self.thresholds
    }

    pub fn detect(
        &mut self,
        landmarks: Option<&FaceLandmarks>,
        light_level: f64,
        now: f64,
        out: &mut Emitted,
    ) -> DistractionResult {
        // a near-black frame is a capture glitch, not darkness
        self.lighting.update(if light_level < 5.0 { 100.0 } else { light_level });

        match landmarks {
            None => self.no_face(),
            Some(landmarks) => {
                self.frames_without_face = 0;
                let geometry = rotation_geometry(landmarks);
                self.last_geometry = Some(geometry);
                if geometry.extreme {
                    self.direction = Direction::Extreme;
                    self.confidence = 0.9;
                    self.side = geometry.side;
                    self.last_known = Direction::Extreme;
                } else {
                    self.direction = Direction::Center;
                    self.confidence = 1.0;
                    self.side = None;
                    self.last_known = Direction::Center;
                }
            }
        }

        self.timing(now, out)
    }

    fn no_face(&mut self) {
        self.frames_without_face += 1;
        let n = self.frames_without_face;
        if n <= 2 {
            self.direction = self.last_known;
            self.confidence = (self.confidence - 0.1).max(0.3);
        } else if n <= 10 {
            self.direction = Direction::NoFace;
            self.confidence = 0.3;
        } else if n <= 30 {
            let profile = self.last_geometry.is_some_and(|g| g.ear_visibility > 0.4);
            if profile {
                self.direction = Direction::Extreme;
                self.confidence = 0.6;
            } else {
                self.direction = Direction::NoFace;
                self.confidence = 0.2;
            }
        } else {
            self.direction = Direction::Absent;
            self.confidence = 0.1;
            if self.started.take().is_some() {
                debug!("Operator absent, distraction timer reset");
            }
            self.alert_level = 0;
        }
    }

    fn timing(&mut self, now: f64, out: &mut Emitted) -> DistractionResult {
        self.distractions.prune(now);
        let distracted = self.direction == Direction::Extreme;

        if distracted {
            self.center_since = None;
            if self.started.is_none() {
                self.started = Some(now);
                self.level1_fired = false;
                self.level2_fired = false;
            }
            let elapsed = now - self.started.unwrap_or(now);

            if elapsed >= self.thresholds.level1_time && !self.level1_fired {
                warn!("Level 1: extreme rotation for {:.1}s", elapsed);
                self.level1_fired = true;
                self.alert_level = 1;
                if self.thresholds.audio_enabled {
                    out.audio(AudioCue::Stop);
                    out.audio(AudioCue::play("vadelante1"));
                }
            } else if elapsed >= self.thresholds.level2_time && !self.level2_fired {
                warn!("Level 2: prolonged extreme rotation for {:.1}s", elapsed);
                self.level2_fired = true;
                self.alert_level = 2;
                self.distractions.push(now);
                if self.thresholds.audio_enabled {
                    out.audio(AudioCue::play("comportamiento10s"));
                }
                info!("Extreme rotation #{} recorded", self.distractions.len());
            }
        } else if let Some(start) = self.started {
            let center_start = *self.center_since.get_or_insert(now);
            if now - center_start >= CENTER_RESET_SECS {
                debug!("Back to centre after {:.1}s", now - start);
                self.started = None;
                self.center_since = None;
                self.alert_level = 0;
            }
        }

        let count = self.distractions.len();
        DistractionResult {
            direction: self.direction,
            side: self.side,
            confidence: self.confidence,
            is_distracted: distracted,
            alert_level: self.alert_level,
            distraction_secs: self.started.map(|s| now - s).unwrap_or(0.0),
            distraction_count: count,
            multiple_distractions: count >= MULTIPLE_DISTRACTIONS,
            is_night_mode: self.lighting.night,
            light_level: self.lighting.level,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds.clone());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DistractionStatus {
    #[serde(flatten)]
    pub result: DistractionResult,
    /// Extreme episodes in the current cycle
    pub extreme_rotations: usize,
    pub cycle_elapsed_secs: f64,
    pub window_minutes: u64,
}

/// Counts long extreme-rotation episodes in reporting cycles
#[derive(Debug, Clone)]
pub struct DistractionMonitor {
    detector: DistractionDetector,
    episode_start: Option<f64>,
    episode_recorded: bool,
    cycle: Vec<f64>,
    reports: CooldownManager,
    total_episodes: usize,
    reports_generated: usize,
}

impl DistractionMonitor {
    pub fn new(thresholds: DistractionThresholds, report_cooldown: f64) -> Self {
        Self {
            detector: DistractionDetector::new(thresholds),
            episode_start: None,
            episode_recorded: false,
            cycle: Vec::new(),
            reports: CooldownManager::new(CooldownConfig::with_default(report_cooldown)),
            total_episodes: 0,
            reports_generated: 0,
        }
    }

    pub fn detector(&self) -> &DistractionDetector {
        &self.detector
    }

    pub fn set_thresholds(&mut self, thresholds: DistractionThresholds) {
        self.detector.set_thresholds(thresholds);
        self.reset_cycle();
    }

    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }

    pub fn reports_generated(&self) -> usize {
        self.reports_generated
    }

    fn window(&self) -> f64 {
        self.detector.thresholds().distraction_window
    }

    pub fn reset_cycle(&mut self) {
        self.cycle.clear();
        self.episode_start = None;
        self.episode_recorded = false;
    }

    pub fn process(
        &mut self,
        landmarks: Option<&FaceLandmarks>,
        light_level: f64,
        now: f64,
        out: &mut Emitted,
    ) -> DistractionStatus {
        let window = self.window();
        if let Some(&first) = self.cycle.first() {
            if now - first > window {
                info!(
                    "Distraction cycle expired after {:.0} minutes with {}/{} events",
                    window / 60.0,
                    self.cycle.len(),
                    MULTIPLE_DISTRACTIONS
                );
                self.reset_cycle();
            }
        }

        let result = self.detector.detect(landmarks, light_level, now, out);
        let kind = DetectorKind::Distraction;

        if result.direction == Direction::Extreme {
            let start = *self.episode_start.get_or_insert(now);
            let duration = now - start;
            if duration >= self.detector.thresholds().level2_time && !self.episode_recorded {
                self.episode_recorded = true;
                self.cycle.push(now);
                self.total_episodes += 1;
                warn!("Extreme rotation #{} recorded ({:.1}s)", self.cycle.len(), duration);
                out.alert(
                    kind,
                    "extreme_rotation",
                    Severity::Warning,
                    format!("Head turned away for {:.1}s", duration),
                    now,
                );
            }
        } else {
            self.episode_start = None;
            self.episode_recorded = false;
        }

        let count = self.cycle.len();
        let window_minutes = (window / 60.0) as u64;
        let cycle_elapsed = self.cycle.first().map(|f| now - f).unwrap_or(0.0);

        if count >= MULTIPLE_DISTRACTIONS && self.reports.try_fire("multiple_extreme_rotations", now) {
            let cycle_minutes = (cycle_elapsed / 60.0 * 10.0).round() / 10.0;
            warn!("{} extreme rotations in {:.1} minutes", count, cycle_minutes);
            out.alert(
                kind,
                "multiple_extreme_rotations",
                Severity::High,
                format!("{} extreme rotations in {} minutes", count, window_minutes),
                now,
            );
            out.report(
                kind,
                "multiple_extreme_rotations",
                json!({
                    "extreme_rotation_count": count,
                    "window_minutes": window_minutes,
                    "actual_cycle_minutes": cycle_minutes,
                    "event_times": self.cycle.clone(),
                    "severity": "HIGH",
                    "recommendation": "Check on the operator immediately",
                    "is_night_mode": result.is_night_mode,
                    "light_level": result.light_level,
                }),
            );
            self.reports_generated += 1;
            // a new cycle starts after every report
            self.cycle.clear();
        }

        DistractionStatus {
            result,
            extreme_rotations: self.cycle.len(),
            cycle_elapsed_secs: self.cycle.first().map(|f| now - f).unwrap_or(0.0),
            window_minutes,
        }
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.reset_cycle();
        self.reports.clear();
        self.total_episodes = 0;
        self.reports_generated = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{synthetic_face, Point};

    /// Profile view: jaw squeezed to one side, eyes close together, nose at the edge
    fn profile_face() -> FaceLandmarks {
        let face = synthetic_face(1.0, 0.0);
        let mut pts: Vec<Point> = face.points().to_vec();
        for (i, p) in pts.iter_mut().enumerate().take(17) {
            // jaw collapses onto x in [300, 360] except the far ear at 220
            if i > 0 {
                p.x = 300.0 + (i as f64 / 16.0) * 60.0;
            }
        }
        pts[36] = Point::new(230.0, 200.0);
        pts[45] = Point::new(260.0, 200.0);
        pts[30] = Point::new(225.0, 240.0);
        FaceLandmarks::new(pts, face.rect).unwrap()
    }

    fn thresholds() -> DistractionThresholds {
        DistractionThresholds {
            level1_time: 3.0,
            level2_time: 7.0,
            ..Default::default()
        }
    }

    fn feed(
        det: &mut DistractionDetector,
        face: Option<&FaceLandmarks>,
        start: f64,
        secs: f64,
        out: &mut Emitted,
    ) -> Vec<DistractionResult> {
        let steps = (secs * 4.0).round() as usize;
        (0..steps)
            .map(|i| det.detect(face, 120.0, start + i as f64 * 0.25, out))
            .collect()
    }

    #[test]
    fn test_frontal_face_is_center() {
        let g = rotation_geometry(&synthetic_face(1.0, 0.0));
        assert!(!g.extreme);
        assert!((g.aspect_ratio - 200.0 / 120.0).abs() < 1e-9);
        assert!(g.nose_offset < 1e-9);
    }

    #[test]
    fn test_profile_is_extreme() {
        let g = rotation_geometry(&profile_face());
        assert!(g.extreme, "{:?}", g);
        assert_eq!(g.side, Some(Side::Left));
    }

    #[test]
    fn test_levels_fire_in_order() {
        let mut det = DistractionDetector::new(thresholds());
        let mut out = Emitted::default();
        let profile = profile_face();
        let results = feed(&mut det, Some(&profile), 0.0, 8.0, &mut out);

        assert_eq!(results.last().unwrap().alert_level, 2);
        assert_eq!(
            out.audio,
            vec![
                AudioCue::Stop,
                AudioCue::play("vadelante1"),
                AudioCue::play("comportamiento10s")
            ]
        );
        assert_eq!(results.last().unwrap().distraction_count, 1);
    }

    #[test]
    fn test_center_resets_after_grace() {
        let mut det = DistractionDetector::new(thresholds());
        let mut out = Emitted::default();
        let profile = profile_face();
        let front = synthetic_face(1.0, 0.0);

        feed(&mut det, Some(&profile), 0.0, 2.0, &mut out);
        // half a second at centre is not enough
        let r = feed(&mut det, Some(&front), 2.0, 0.5, &mut out);
        assert!(r.last().unwrap().distraction_secs > 0.0);
        let r = feed(&mut det, Some(&front), 2.5, 1.0, &mut out);
        assert_eq!(r.last().unwrap().distraction_secs, 0.0);
        assert!(out.audio.is_empty());
    }

    #[test]
    fn test_no_face_tiers() {
        let mut det = DistractionDetector::new(thresholds());
        let mut out = Emitted::default();
        det.detect(Some(&profile_face()), 120.0, 0.0, &mut out);

        let results = feed(&mut det, None, 0.25, 10.0, &mut out);
        assert_eq!(results[0].direction, Direction::Extreme);
        assert_eq!(results[5].direction, Direction::NoFace);
        // profile was visible before the face was lost
        assert_eq!(results[15].direction, Direction::Extreme);
        assert_eq!(results[35].direction, Direction::Absent);
        assert_eq!(results[35].distraction_secs, 0.0);
    }

    #[test]
    fn test_dark_glitch_reads_as_daylight() {
        let mut det = DistractionDetector::new(thresholds());
        let mut out = Emitted::default();
        let r = det.detect(None, 2.0, 0.0, &mut out);
        assert_eq!(r.light_level, 100.0);
        assert!(!r.is_night_mode);
    }

    #[test]
    fn test_three_episodes_report_and_reset_cycle() {
        let mut monitor = DistractionMonitor::new(thresholds(), 30.0);
        let mut out = Emitted::default();
        let profile = profile_face();
        let front = synthetic_face(1.0, 0.0);

        let mut t = 0.0;
        for _ in 0..3 {
            for i in 0..32 {
                monitor.process(Some(&profile), 120.0, t + i as f64 * 0.25, &mut out);
            }
            t += 8.0;
            for i in 0..8 {
                monitor.process(Some(&front), 120.0, t + i as f64 * 0.25, &mut out);
            }
            t += 2.0;
        }

        assert_eq!(monitor.total_episodes(), 3);
        assert_eq!(out.reports.len(), 1);
        let data = &out.reports[0].data;
        assert_eq!(data["extreme_rotation_count"], 3);
        assert_eq!(data["window_minutes"], 10);
        assert_eq!(data["severity"], "HIGH");
        let status = monitor.process(Some(&front), 120.0, t, &mut out);
        assert_eq!(status.extreme_rotations, 0);
    }

    #[test]
    fn test_cycle_expires() {
        let mut monitor = DistractionMonitor::new(thresholds(), 30.0);
        let mut out = Emitted::default();
        let profile = profile_face();
        for i in 0..32 {
            monitor.process(Some(&profile), 120.0, i as f64 * 0.25, &mut out);
        }
        let front = synthetic_face(1.0, 0.0);
        let status = monitor.process(Some(&front), 120.0, 100.0, &mut out);
        assert_eq!(status.extreme_rotations, 1);
        let status = monitor.process(Some(&front), 120.0, 700.0, &mut out);
        assert_eq!(status.extreme_rotations, 0);
    }
}
