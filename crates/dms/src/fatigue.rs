//! Eye-closure fatigue detection
//!
//! [`FatigueDetector`] turns per-frame EAR into confirmed eye states,
//! blinks and microsleeps. [`FatigueMonitor`] sits on top of it and
//! decides which alerts, audio cues and reports a frame produces.

use crate::analysis::{DetectorKind, Emitted, Severity};
use crate::state::{EventWindow, Lighting, Smoother};
use alerting::{AudioCue, CooldownConfig, CooldownManager};
use calibration::FatigueThresholds;
use camera_capture::FaceLandmarks;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Microsleeps are counted inside this window (seconds)
pub const MICROSLEEP_WINDOW: f64 = 600.0;
/// Microsleeps in the window that make fatigue critical
pub const CRITICAL_MICROSLEEPS: usize = 3;
/// Closures shorter than this are blinks (seconds)
pub const BLINK_MAX_DURATION: f64 = 0.5;
/// Nose-chin deviation from vertical that counts as looking down (radians)
const HEAD_DOWN_DEVIATION: f64 = 0.3;
const HEAD_DOWN_FACTOR: f64 = 0.7;
/// Nose drop below the eye line, relative to eye distance, that means a console glance
const CONSOLE_GLANCE_RATIO: f64 = 0.4;
const PROLONGED_CLOSURE: f64 = 3.0;
const HISTORY_SIZE: usize = 300;

/// Per-frame fatigue result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FatigueResult {
    pub ear: f64,
    pub smoothed_ear: f64,
    pub threshold: f64,
    pub eyes_closed: bool,
    pub closure_duration: f64,
    pub microsleep_detected: bool,
    /// Microsleeps in the window, including one registered this frame
    pub microsleep_count: usize,
    pub critical_fatigue: bool,
    pub is_night_mode: bool,
    pub light_level: f64,
    pub looking_down: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FatigueStats {
    pub total_microsleeps: usize,
    pub total_blinks: usize,
    pub blinks_per_minute: f64,
    pub session_secs: f64,
}

/// Angle of the nose-chin line against the image horizontal; `true` when
/// it leans more than 0.3 rad away from vertical
pub fn head_pose(landmarks: &FaceLandmarks) -> (bool, f64) {
    let nose = landmarks.point(30);
    let chin = landmarks.point(8);
    let angle = (chin.y - nose.y).atan2(chin.x - nose.x);
    let deviation = (angle - std::f64::consts::FRAC_PI_2).abs();
    (deviation > HEAD_DOWN_DEVIATION, deviation)
}

/// Nose tip well below the eye line: the operator is glancing at the console
pub fn is_console_glance(landmarks: &FaceLandmarks) -> bool {
    let left = landmarks.point(36);
    let right = landmarks.point(45);
    let nose = landmarks.point(30);
    let eyes_center = left.midpoint(&right);
    nose.y - eyes_center.y > left.distance(&right) * CONSOLE_GLANCE_RATIO
}

/// EAR state machine
#[derive(Debug, Clone)]
pub struct FatigueDetector {
    thresholds: FatigueThresholds,
    lighting: Lighting,
    ear: Smoother,
    open_frames: u32,
    closed_frames: u32,
    closed_since: Option<f64>,
    microsleep_in_progress: bool,
    microsleeps: EventWindow,
    total_microsleeps: usize,
    blinks: usize,
    session_start: Option<f64>,
    last_seen: f64,
}

impl FatigueDetector {
    pub fn new(thresholds: FatigueThresholds) -> Self {
        let lighting = Lighting::new(thresholds.night_mode_threshold, true);
        Self {
            thresholds,
            lighting,
            ear: Smoother::new(3),
            open_frames: 0,
            closed_frames: 0,
            closed_since: None,
            microsleep_in_progress: false,
            microsleeps: EventWindow::new(MICROSLEEP_WINDOW),
            total_microsleeps: 0,
            blinks: 0,
            session_start: None,
            last_seen: 0.0,
        }
    }

    pub fn set_thresholds(&mut self, thresholds: FatigueThresholds) {
        info!(
            "Fatigue thresholds updated: EAR {:.3}, microsleep {:.2}s",
            thresholds.ear_threshold, thresholds.microsleep_threshold
        );
        self.lighting.set_threshold(thresholds.night_mode_threshold, true);
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &FatigueThresholds {
        &self.thresholds
    }

    /// EAR threshold for the current lighting
    pub fn current_threshold(&self) -> f64 {
        if self.lighting.night {
            self.thresholds.ear_threshold - self.thresholds.ear_night_adjustment
        } else {
            self.thresholds.ear_threshold
        }
    }

    pub fn microsleep_count(&self) -> usize {
        self.microsleeps.len()
    }

    pub fn closure_duration(&self) -> f64 {
        self.closed_since.map(|t| self.last_seen - t).unwrap_or(0.0)
    }

    pub fn detect(&mut self, landmarks: Option<&FaceLandmarks>, light_level: f64, now: f64) -> FatigueResult {
        self.session_start.get_or_insert(now);
        self.last_seen = now;
        self.lighting.update(light_level);
        self.microsleeps.prune(now);

        let Some(landmarks) = landmarks else {
            self.closed_since = None;
            self.microsleep_in_progress = false;
            self.open_frames = 0;
            self.closed_frames = 0;
            return FatigueResult {
                threshold: self.current_threshold(),
                microsleep_count: self.microsleeps.len(),
                is_night_mode: self.lighting.night,
                light_level,
                ..Default::default()
            };
        };

        let ear = landmarks.average_ear();
        let smoothed = self.ear.push(ear);
        let (looking_down, _) = head_pose(landmarks);

        let mut threshold = self.current_threshold();
        if looking_down {
            threshold *= HEAD_DOWN_FACTOR;
            debug!("Head tilted down, EAR threshold {:.3}", threshold);
        }

        if smoothed > threshold {
            self.open_frames += 1;
            self.closed_frames = 0;
        } else if !looking_down || ear < threshold * 0.8 {
            self.closed_frames += 1;
            self.open_frames = 0;
        } else {
            self.open_frames += 1;
            self.closed_frames = 0;
        }

        let mut confirmed_closed = self.closed_frames >= self.thresholds.frames_to_confirm;
        if confirmed_closed && is_console_glance(landmarks) {
            debug!("Console glance, closure counter reset");
            confirmed_closed = false;
            self.closed_frames = 0;
        }
        let confirmed_open = self.open_frames >= self.thresholds.frames_to_confirm;

        let mut microsleep_detected = false;
        let mut critical = false;
        let mut count = self.microsleeps.len();

        if confirmed_closed {
            let start = *self.closed_since.get_or_insert(now);
            let duration = now - start;
            if duration >= self.thresholds.microsleep_threshold && !self.microsleep_in_progress {
                microsleep_detected = true;
                self.microsleep_in_progress = true;
                self.total_microsleeps += 1;
                self.microsleeps.push(now);
                count = self.microsleeps.len();
                warn!("Microsleep detected: eyes closed {:.1}s ({} in window)", duration, count);
                if count >= CRITICAL_MICROSLEEPS {
                    critical = true;
                    warn!("Critical fatigue: {} microsleeps in {}s", count, MICROSLEEP_WINDOW);
                    self.microsleeps.keep_latest();
                }
            }
        } else if confirmed_open {
            if let Some(start) = self.closed_since.take() {
                let duration = now - start;
                if duration < BLINK_MAX_DURATION {
                    self.blinks += 1;
                }
                debug!("Eyes open after {:.2}s", duration);
            }
            self.microsleep_in_progress = false;
        }

        FatigueResult {
            ear,
            smoothed_ear: smoothed,
            threshold,
            eyes_closed: self.closed_since.is_some(),
            closure_duration: self.closure_duration(),
            microsleep_detected,
            microsleep_count: count,
            critical_fatigue: critical,
            is_night_mode: self.lighting.night,
            light_level,
            looking_down,
        }
    }

    pub fn stats(&self) -> FatigueStats {
        let session_secs = self.session_start.map(|s| self.last_seen - s).unwrap_or(0.0);
        FatigueStats {
            total_microsleeps: self.total_microsleeps,
            total_blinks: self.blinks,
            blinks_per_minute: if session_secs > 0.0 {
                self.blinks as f64 / session_secs * 60.0
            } else {
                0.0
            },
            session_secs,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    /// Fewer than 10 samples
    Insufficient,
}

/// Fatigue result plus the monitor's view of it
#[derive(Debug, Clone, Serialize)]
pub struct FatigueStatus {
    #[serde(flatten)]
    pub result: FatigueResult,
    pub fatigue_percentage: u8,
    pub trend: Trend,
}

/// Turns detector results into alerts, audio and reports
#[derive(Debug, Clone)]
pub struct FatigueMonitor {
    detector: FatigueDetector,
    reports: CooldownManager,
    history: VecDeque<u8>,
    total_alerts: usize,
}

impl FatigueMonitor {
    pub fn new(thresholds: FatigueThresholds, report_cooldown: f64) -> Self {
        let cooldown = CooldownConfig::with_default(report_cooldown)
            .with_override("critical_fatigue", report_cooldown * 2.0);
        Self {
            detector: FatigueDetector::new(thresholds),
            reports: CooldownManager::new(cooldown),
            history: VecDeque::with_capacity(HISTORY_SIZE),
            total_alerts: 0,
        }
    }

    pub fn detector(&self) -> &FatigueDetector {
        &self.detector
    }

    pub fn set_thresholds(&mut self, thresholds: FatigueThresholds) {
        self.detector.set_thresholds(thresholds);
        self.history.clear();
    }

    pub fn total_alerts(&self) -> usize {
        self.total_alerts
    }

    pub fn fatigue_percentage(count: usize, eyes_closed: bool) -> u8 {
        match count {
            c if c >= CRITICAL_MICROSLEEPS => 100,
            2 => 70,
            1 => 40,
            _ if eyes_closed => 20,
            _ => 0,
        }
    }

    pub fn trend(&self) -> Trend {
        let n = self.history.len();
        if n < 10 {
            return Trend::Insufficient;
        }
        if n <= 180 {
            return Trend::Stable;
        }
        let avg = |it: &mut dyn Iterator<Item = &u8>| {
            let v: Vec<f64> = it.map(|&p| p as f64).collect();
            v.iter().sum::<f64>() / v.len() as f64
        };
        let recent = avg(&mut self.history.iter().skip(n - 90));
        let older = avg(&mut self.history.iter().take(90));
        if recent > older + 10.0 {
            Trend::Increasing
        } else if recent < older - 10.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn process(
        &mut self,
        landmarks: Option<&FaceLandmarks>,
        light_level: f64,
        now: f64,
        out: &mut Emitted,
    ) -> FatigueStatus {
        let result = self.detector.detect(landmarks, light_level, now);
        let percentage = Self::fatigue_percentage(result.microsleep_count, result.eyes_closed);
        let kind = DetectorKind::Fatigue;

        if result.microsleep_detected {
            out.audio(AudioCue::play("alarma"));
            out.audio(AudioCue::queue(&format!(
                "fatigue_{}",
                result.microsleep_count.clamp(1, CRITICAL_MICROSLEEPS)
            )));
            if self.reports.try_fire("microsleep", now) {
                out.report(
                    kind,
                    "microsleep",
                    json!({
                        "ear_value": result.ear,
                        "ear_threshold": result.threshold,
                        "eyes_closed_duration": result.closure_duration,
                        "microsleep_count": result.microsleep_count,
                        "is_night_mode": result.is_night_mode,
                        "light_level": result.light_level,
                        "fatigue_percentage": percentage,
                        "analysis_timestamp": now,
                    }),
                );
            }
        }

        let before = out.alerts.len();
        if result.critical_fatigue {
            out.alert(kind, "critical_fatigue", Severity::High, "Critical fatigue detected".into(), now);
        }
        if result.microsleep_count >= CRITICAL_MICROSLEEPS {
            out.alert(
                kind,
                "multiple_microsleeps",
                Severity::Critical,
                format!("{} microsleeps in 10 minutes", result.microsleep_count),
                now,
            );
        }
        if result.closure_duration > PROLONGED_CLOSURE {
            out.alert(
                kind,
                "prolonged_closure",
                Severity::Critical,
                format!("Eyes closed for {:.1}s", result.closure_duration),
                now,
            );
        }
        let raised = out.alerts.len() - before;
        self.total_alerts += raised;

        if result.critical_fatigue && self.reports.try_fire("critical_fatigue", now) {
            let stats = self.detector.stats();
            let alerts: Vec<&str> = out.alerts[before..].iter().map(|a| a.alert_type.as_str()).collect();
            out.report(
                kind,
                "critical_fatigue",
                json!({
                    "microsleep_count": result.microsleep_count,
                    "total_microsleeps": stats.total_microsleeps,
                    "fatigue_percentage": percentage,
                    "alerts": alerts,
                    "session_duration": stats.session_secs,
                    "critical_timestamp": now,
                }),
            );
        }

        if self.history.len() == HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(percentage);

        FatigueStatus {
            result,
            fatigue_percentage: percentage,
            trend: self.trend(),
        }
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.reports.clear();
        self.history.clear();
        self.total_alerts = 0;
    }
}
