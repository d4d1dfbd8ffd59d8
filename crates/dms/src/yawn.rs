//! Yawn detection from mouth opening

use crate::analysis::{DetectorKind, Emitted, Severity};
use crate::state::{EventWindow, Lighting, Smoother};
use alerting::{AudioCue, CooldownConfig, CooldownManager};
use calibration::YawnThresholds;
use camera_capture::{FaceLandmarks, Point};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// Minimum gap between two yawn audio cues (seconds)
pub const AUDIO_COOLDOWN: f64 = 5.0;

/// Shape measurements behind the smile-aware MAR
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MouthShape {
    pub raw_mar: f64,
    pub mar: f64,
    pub corner_elevation: f64,
    pub asymmetry: f64,
    pub center_dominance: f64,
    pub smiling: bool,
}

/// MAR that damps smiles and boosts centre-dominant openings.
///
/// Uses the 20 mouth points (48..68); heights are taken at five columns
/// and the largest is divided by the corner-to-corner width.
pub fn smile_aware_mar(landmarks: &FaceLandmarks) -> MouthShape {
    let m: &[Point] = landmarks.mouth();
    let dy = |a: usize, b: usize| (m[a].y - m[b].y).abs();
    let heights = [dy(14, 18), dy(3, 9), dy(15, 19), dy(4, 8), dy(16, 17)];
    let height = heights.iter().cloned().fold(0.0, f64::max);
    let width = m[0].distance(&m[6]);
    if width <= 0.0 || height <= 0.0 {
        return MouthShape::default();
    }
    let raw = height / width;

    // positive when the corners sit above the lip centre
    let corner_elevation = (m[3].y + m[9].y) / 2.0 - (m[0].y + m[6].y) / 2.0;
    let asymmetry = ((heights[0] + heights[1]) / 2.0 - (heights[3] + heights[4]) / 2.0).abs() / height;
    let center = heights[2];
    let center_dominance = if center > 0.0 {
        (center - (heights[0] + heights[4]) / 2.0) / center
    } else {
        0.0
    };

    let smiling = corner_elevation > 5.0
        || (width / height > 3.5 && center_dominance < 0.2)
        || (raw > 0.3 && raw < 0.45 && asymmetry > 0.3);

    let mar = if smiling {
        debug!("Smile filtered: MAR {:.3} -> {:.3}", raw, raw * 0.6);
        raw * 0.6
    } else if center_dominance > 0.15 && raw > 0.35 {
        raw * 1.1
    } else {
        raw
    };

    MouthShape {
        raw_mar: raw,
        mar,
        corner_elevation,
        asymmetry,
        center_dominance,
        smiling,
    }
}

/// Per-frame yawn result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct YawnResult {
    pub mar: f64,
    pub smoothed_mar: f64,
    pub threshold: f64,
    pub is_yawning: bool,
    /// A yawn long enough to count ended on this frame
    pub yawn_detected: bool,
    pub yawn_duration: f64,
    pub smiling: bool,
    pub is_night_mode: bool,
    pub light_level: f64,
}

#[derive(Debug, Clone)]
pub struct YawnDetector {
    thresholds: YawnThresholds,
    lighting: Lighting,
    mar: Smoother,
    yawn_frames: u32,
    normal_frames: u32,
    yawn_started: Option<f64>,
}

impl YawnDetector {
    pub fn new(thresholds: YawnThresholds) -> Self {
        Self {
            lighting: Lighting::new(thresholds.night_mode_threshold, thresholds.enable_night_mode),
            thresholds,
            mar: Smoother::new(3),
            yawn_frames: 0,
            normal_frames: 0,
            yawn_started: None,
        }
    }

    pub fn set_thresholds(&mut self, thresholds: YawnThresholds) {
        info!(
            "Yawn thresholds updated: MAR {:.3}, duration {:.1}s",
            thresholds.mar_threshold, thresholds.duration_threshold
        );
        self.lighting
            .set_threshold(thresholds.night_mode_threshold, thresholds.enable_night_mode);
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &YawnThresholds {
        &self.thresholds
    }

    pub fn current_threshold(&self) -> f64 {
        if self.lighting.night {
            self.thresholds.mar_threshold - self.thresholds.night_adjustment
        } else {
            self.thresholds.mar_threshold
        }
    }

    pub fn detect(&mut self, landmarks: Option<&FaceLandmarks>, light_level: f64, now: f64) -> YawnResult {
        self.lighting.update(light_level);
        let threshold = self.current_threshold();

        let Some(landmarks) = landmarks else {
            return YawnResult {
                threshold,
                is_night_mode: self.lighting.night,
                light_level,
                ..Default::default()
            };
        };

        let shape = smile_aware_mar(landmarks);
        let smoothed = self.mar.push(shape.mar);

        if smoothed > threshold {
            self.yawn_frames += 1;
            self.normal_frames = 0;
        } else {
            self.normal_frames += 1;
            self.yawn_frames = 0;
        }
        let confirmed_yawn = self.yawn_frames >= self.thresholds.frames_to_confirm;
        let confirmed_normal = self.normal_frames >= self.thresholds.frames_to_confirm;

        let mut yawn_detected = false;
        let mut duration = 0.0;
        if confirmed_yawn && self.yawn_started.is_none() {
            info!("Yawn started (MAR {:.2})", shape.mar);
            self.yawn_started = Some(now);
        } else if confirmed_normal {
            if let Some(start) = self.yawn_started.take() {
                duration = now - start;
                if duration >= self.thresholds.duration_threshold {
                    yawn_detected = true;
                    info!("Yawn completed: {:.1}s", duration);
                } else {
                    debug!("Mouth opening too short for a yawn: {:.1}s", duration);
                }
            }
        }
        if let Some(start) = self.yawn_started {
            duration = now - start;
        }

        YawnResult {
            mar: shape.mar,
            smoothed_mar: smoothed,
            threshold,
            is_yawning: self.yawn_started.is_some(),
            yawn_detected,
            yawn_duration: duration,
            smiling: shape.smiling,
            is_night_mode: self.lighting.night,
            light_level,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds.clone());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YawnStatus {
    #[serde(flatten)]
    pub result: YawnResult,
    pub yawn_count: usize,
    pub window_minutes: u64,
    pub max_yawns: usize,
    pub multiple_yawns: bool,
}

/// Counts yawns over the sliding window and escalates
#[derive(Debug, Clone)]
pub struct YawnMonitor {
    detector: YawnDetector,
    yawns: EventWindow,
    last_audio: Option<f64>,
    reports: CooldownManager,
    total_yawns: usize,
    multiple_yawn_events: usize,
}

impl YawnMonitor {
    pub fn new(thresholds: YawnThresholds, report_cooldown: f64) -> Self {
        Self {
            yawns: EventWindow::new(thresholds.window_size),
            detector: YawnDetector::new(thresholds),
            last_audio: None,
            reports: CooldownManager::new(CooldownConfig::with_default(report_cooldown)),
            total_yawns: 0,
            multiple_yawn_events: 0,
        }
    }

    pub fn detector(&self) -> &YawnDetector {
        &self.detector
    }

    pub fn set_thresholds(&mut self, thresholds: YawnThresholds) {
        self.yawns.set_window(thresholds.window_size);
        self.detector.set_thresholds(thresholds);
    }

    pub fn yawn_count(&self) -> usize {
        self.yawns.len()
    }

    pub fn total_yawns(&self) -> usize {
        self.total_yawns
    }

    pub fn multiple_yawn_events(&self) -> usize {
        self.multiple_yawn_events
    }

    pub fn reset_yawn_counter(&mut self) {
        self.yawns.clear();
        info!("Yawn counter reset");
    }

    pub fn process(
        &mut self,
        landmarks: Option<&FaceLandmarks>,
        light_level: f64,
        now: f64,
        out: &mut Emitted,
    ) -> YawnStatus {
        let result = self.detector.detect(landmarks, light_level, now);
        let kind = DetectorKind::Yawn;

        if result.yawn_detected {
            self.yawns.push(now);
            self.total_yawns += 1;
            let count = self.yawns.len();
            info!("Yawn #{} in the current window", count);
            if self.last_audio.map_or(true, |t| now - t > AUDIO_COOLDOWN) {
                out.audio(AudioCue::play(&format!("bostezo{}", count.clamp(1, 3))));
                self.last_audio = Some(now);
            } else {
                debug!("Yawn audio suppressed by cooldown");
            }
        }
        self.yawns.prune(now);

        let thresholds = self.detector.thresholds();
        let max = thresholds.max_yawns_before_alert;
        let window_minutes = (self.yawns.window() / 60.0) as u64;
        let count = self.yawns.len();
        let multiple = count >= max;

        if multiple && self.reports.try_fire("multiple_yawns", now) {
            warn!("{} yawns in {} minutes", count, window_minutes);
            self.multiple_yawn_events += 1;
            out.alert(
                kind,
                "multiple_yawns",
                Severity::High,
                format!("{} yawns in {} minutes", count, window_minutes),
                now,
            );
            out.report(
                kind,
                "multiple_yawns",
                json!({
                    "yawn_count": count,
                    "window_minutes": window_minutes,
                    "max_allowed": max,
                    "yawn_times": self.yawns.times(),
                    "mar_value": result.mar,
                    "mar_threshold": result.threshold,
                    "is_night_mode": result.is_night_mode,
                    "light_level": result.light_level,
                    "analysis_timestamp": now,
                }),
            );
            out.audio(AudioCue::queue("alarma"));
        }

        YawnStatus {
            result,
            yawn_count: count,
            window_minutes,
            max_yawns: max,
            multiple_yawns: multiple,
        }
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.yawns.clear();
        self.last_audio = None;
        self.reports.clear();
        self.total_yawns = 0;
        self.multiple_yawn_events = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::synthetic_face;

    fn thresholds() -> YawnThresholds {
        YawnThresholds {
            mar_threshold: 0.6,
            duration_threshold: 2.0,
            frames_to_confirm: 2,
            ..Default::default()
        }
    }

    /// Mouth open for `secs`, then closed for 1s, sampled every 0.1s
    fn yawn(monitor: &mut YawnMonitor, start: f64, secs: f64, out: &mut Emitted) -> Vec<YawnStatus> {
        let open = synthetic_face(1.0, 1.0);
        let closed = synthetic_face(1.0, 0.0);
        let mut statuses = Vec::new();
        let open_steps = (secs * 10.0).round() as usize;
        for i in 0..open_steps {
            statuses.push(monitor.process(Some(&open), 120.0, start + i as f64 * 0.1, out));
        }
        for i in 0..10 {
            statuses.push(monitor.process(Some(&closed), 120.0, start + secs + i as f64 * 0.1, out));
        }
        statuses
    }

    #[test]
    fn test_mar_closed_and_open() {
        let closed = smile_aware_mar(&synthetic_face(1.0, 0.0));
        assert!(!closed.smiling);
        assert!((closed.mar - 14.0 / 60.0).abs() < 1e-9);

        let open = smile_aware_mar(&synthetic_face(1.0, 1.0));
        assert!(!open.smiling);
        assert!((open.raw_mar - 74.0 / 60.0).abs() < 1e-9);
        // centre-dominant opening gets boosted
        assert!((open.mar - open.raw_mar * 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_smile_is_damped() {
        let face = synthetic_face(1.0, 0.5);
        let mut pts = face.points().to_vec();
        // lift both corners
        pts[48].y -= 12.0;
        pts[54].y -= 12.0;
        let smile = FaceLandmarks::new(pts, face.rect).unwrap();
        let shape = smile_aware_mar(&smile);
        assert!(shape.smiling);
        assert!((shape.mar - shape.raw_mar * 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_short_opening_is_not_a_yawn() {
        let mut monitor = YawnMonitor::new(thresholds(), 30.0);
        let mut out = Emitted::default();
        let statuses = yawn(&mut monitor, 0.0, 1.0, &mut out);
        assert!(statuses.iter().any(|s| s.result.is_yawning));
        assert!(statuses.iter().all(|s| !s.result.yawn_detected));
        assert_eq!(monitor.yawn_count(), 0);
    }

    #[test]
    fn test_yawn_audio_escalates() {
        let mut monitor = YawnMonitor::new(thresholds(), 30.0);
        let mut out = Emitted::default();
        yawn(&mut monitor, 0.0, 3.0, &mut out);
        yawn(&mut monitor, 20.0, 3.0, &mut out);
        assert_eq!(monitor.yawn_count(), 2);
        assert_eq!(out.audio, vec![AudioCue::play("bostezo1"), AudioCue::play("bostezo2")]);
        assert!(out.reports.is_empty());
    }

    #[test]
    fn test_third_yawn_reports_then_alarm() {
        let mut monitor = YawnMonitor::new(thresholds(), 30.0);
        let mut out = Emitted::default();
        for k in 0..3 {
            yawn(&mut monitor, k as f64 * 20.0, 3.0, &mut out);
        }
        assert_eq!(out.reports.len(), 1);
        let report = &out.reports[0];
        assert_eq!(report.event_type, "multiple_yawns");
        assert_eq!(report.data["yawn_count"], 3);
        assert_eq!(report.data["window_minutes"], 10);
        assert_eq!(
            &out.audio[2..],
            &[AudioCue::play("bostezo3"), AudioCue::queue("alarma")]
        );

        monitor.reset_yawn_counter();
        assert_eq!(monitor.yawn_count(), 0);
        assert_eq!(monitor.total_yawns(), 3);
    }

    #[test]
    fn test_audio_cooldown() {
        let mut monitor = YawnMonitor::new(
            YawnThresholds {
                duration_threshold: 0.5,
                ..thresholds()
            },
            30.0,
        );
        let mut out = Emitted::default();
        yawn(&mut monitor, 0.0, 1.0, &mut out);
        yawn(&mut monitor, 2.0, 1.0, &mut out);
        assert_eq!(monitor.yawn_count(), 2);
        assert_eq!(out.audio.len(), 1);
    }

    #[test]
    fn test_old_yawns_leave_window() {
        let mut monitor = YawnMonitor::new(thresholds(), 30.0);
        let mut out = Emitted::default();
        yawn(&mut monitor, 0.0, 3.0, &mut out);
        let face = synthetic_face(1.0, 0.0);
        monitor.process(Some(&face), 120.0, 700.0, &mut out);
        assert_eq!(monitor.yawn_count(), 0);
    }
}
