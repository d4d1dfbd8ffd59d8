//! Phone and cigarette use near the face

use crate::analysis::{DetectorKind, Emitted, Severity};
use crate::state::{EventWindow, Lighting};
use alerting::{AudioCue, CooldownConfig, CooldownManager};
use calibration::BehaviorThresholds;
use camera_capture::{FaceRect, Point};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const PHONE_LABEL: &str = "cell phone";
pub const CIGARETTE_LABEL: &str = "cigarette";
/// An object missing for longer than this ends its presence (seconds)
pub const PRESENCE_GRACE: f64 = 1.0;
const HISTORY_SIZE: usize = 300;

/// Axis-aligned box in frame pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// One object found by the detector model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Phone,
    Cigarette,
}

impl BehaviorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Phone => PHONE_LABEL,
            Self::Cigarette => CIGARETTE_LABEL,
        }
    }
}

/// (alert type, behavior, value): value is seconds or a sighting count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorAlert {
    pub alert_type: String,
    pub behavior: BehaviorKind,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BehaviorResult {
    /// Detections that passed confidence and proximity filters
    pub detections: Vec<ObjectDetection>,
    pub alerts: Vec<BehaviorAlert>,
    pub phone_secs: f64,
    pub cigarette_secs: f64,
    pub cigarette_sightings: usize,
    /// Detection ran on this frame
    pub processed: bool,
    pub is_night_mode: bool,
    pub light_level: f64,
}

/// Continuous presence of one object class
#[derive(Debug, Clone, Default)]
struct Presence {
    since: Option<f64>,
    last_seen: f64,
    fired: Vec<String>,
}

impl Presence {
    /// Returns true when this sighting starts a new presence
    fn seen(&mut self, now: f64) -> bool {
        self.last_seen = now;
        if self.since.is_none() {
            self.since = Some(now);
            self.fired.clear();
            return true;
        }
        false
    }

    fn expire(&mut self, now: f64) {
        if self.since.is_some() && now - self.last_seen > PRESENCE_GRACE {
            self.since = None;
        }
    }

    fn duration(&self) -> f64 {
        self.since.map(|s| self.last_seen - s).unwrap_or(0.0)
    }

    /// Record `alert` once per presence
    fn fire_once(&mut self, alert: &str) -> bool {
        if self.fired.iter().any(|a| a == alert) {
            return false;
        }
        self.fired.push(alert.to_string());
        true
    }
}

#[derive(Debug, Clone)]
pub struct BehaviorDetector {
    thresholds: BehaviorThresholds,
    lighting: Lighting,
    frame_counter: u64,
    phone: Presence,
    cigarette: Presence,
    sightings: EventWindow,
}

impl BehaviorDetector {
    pub fn new(thresholds: BehaviorThresholds) -> Self {
        Self {
            lighting: Lighting::new(thresholds.night_mode_threshold, thresholds.enable_night_mode),
            sightings: EventWindow::new(thresholds.cigarette_pattern_window),
            thresholds,
            frame_counter: 0,
            phone: Presence::default(),
            cigarette: Presence::default(),
        }
    }

    pub fn set_thresholds(&mut self, thresholds: BehaviorThresholds) {
        info!(
            "Behavior thresholds updated: confidence {:.2}/{:.2}, phone {:.0}s/{:.0}s",
            thresholds.confidence_threshold,
            thresholds.night_confidence_threshold,
            thresholds.phone_alert_threshold_1,
            thresholds.phone_alert_threshold_2
        );
        self.lighting
            .set_threshold(thresholds.night_mode_threshold, thresholds.enable_night_mode);
        self.sightings.set_window(thresholds.cigarette_pattern_window);
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &BehaviorThresholds {
        &self.thresholds
    }

    /// Advance the frame counter; true when object detection should run
    pub fn tick(&mut self) -> bool {
        self.frame_counter += 1;
        if !self.thresholds.enable_optimization {
            return true;
        }
        let interval = self.thresholds.processing_interval.max(1) as u64;
        (self.frame_counter - 1) % interval == 0
    }

    pub fn confidence_threshold(&self) -> f32 {
        if self.lighting.night {
            self.thresholds.night_confidence_threshold
        } else {
            self.thresholds.confidence_threshold
        }
    }

    /// Objects whose centre falls inside the face box grown by the proximity factor
    pub fn filter(&self, objects: &[ObjectDetection], face: Option<&FaceRect>) -> Vec<ObjectDetection> {
        let min_conf = self.confidence_threshold();
        let zone = face.map(|f| f.expanded(self.thresholds.face_proximity_factor));
        objects
            .iter()
            .filter(|o| o.label == PHONE_LABEL || o.label == CIGARETTE_LABEL)
            .filter(|o| o.confidence >= min_conf)
            .filter(|o| zone.as_ref().map_or(true, |z| z.contains(&o.bbox.center())))
            .cloned()
            .collect()
    }

    /// `objects` is `None` on frames where detection was skipped; timers
    /// keep running from the last real detection.
    pub fn detect(
        &mut self,
        objects: Option<&[ObjectDetection]>,
        face: Option<&FaceRect>,
        light_level: f64,
        now: f64,
    ) -> BehaviorResult {
        self.lighting.update(light_level);
        self.sightings.prune(now);

        let Some(objects) = objects else {
            return self.result(Vec::new(), Vec::new(), false, light_level);
        };

        let detections = self.filter(objects, face);
        let has = |label: &str| detections.iter().any(|d| d.label == label);
        let (has_phone, has_cigarette) = (has(PHONE_LABEL), has(CIGARETTE_LABEL));

        if has_phone {
            self.phone.seen(now);
        }
        if has_cigarette && self.cigarette.seen(now) {
            self.sightings.push(now);
            debug!("Cigarette sighting #{} in window", self.sightings.len());
        }
        self.phone.expire(now);
        self.cigarette.expire(now);

        let mut alerts = Vec::new();
        let t = &self.thresholds;

        let phone_secs = self.phone.duration();
        if self.phone.since.is_some() {
            if phone_secs >= t.phone_alert_threshold_2 && self.phone.fire_once("phone_7s") {
                warn!("Phone use for {:.1}s", phone_secs);
                alerts.push(alert("phone_7s", BehaviorKind::Phone, phone_secs));
            } else if phone_secs >= t.phone_alert_threshold_1 && self.phone.fire_once("phone_3s") {
                warn!("Phone use for {:.1}s", phone_secs);
                alerts.push(alert("phone_3s", BehaviorKind::Phone, phone_secs));
            }
        }

        let cigarette_secs = self.cigarette.duration();
        if self.cigarette.since.is_some()
            && cigarette_secs >= t.cigarette_continuous_threshold
            && self.cigarette.fire_once("smoking_7s")
        {
            warn!("Cigarette in view for {:.1}s", cigarette_secs);
            alerts.push(alert("smoking_7s", BehaviorKind::Cigarette, cigarette_secs));
        }
        if self.sightings.len() >= t.cigarette_pattern_threshold {
            let count = self.sightings.len();
            warn!("Smoking pattern: {} sightings in {:.0}s", count, t.cigarette_pattern_window);
            alerts.push(alert("smoking_pattern", BehaviorKind::Cigarette, count as f64));
            self.sightings.clear();
        }

        self.result(detections, alerts, true, light_level)
    }

    fn result(
        &self,
        detections: Vec<ObjectDetection>,
        alerts: Vec<BehaviorAlert>,
        processed: bool,
        light_level: f64,
    ) -> BehaviorResult {
        BehaviorResult {
            detections,
            alerts,
            phone_secs: self.phone.duration(),
            cigarette_secs: self.cigarette.duration(),
            cigarette_sightings: self.sightings.len(),
            processed,
            is_night_mode: self.lighting.night,
            light_level,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds.clone());
    }
}

fn alert(alert_type: &str, behavior: BehaviorKind, value: f64) -> BehaviorAlert {
    BehaviorAlert {
        alert_type: alert_type.to_string(),
        behavior,
        value,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
struct HistoryEntry {
    has_phone: bool,
    has_cigarette: bool,
    alerts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BehaviorSessionStats {
    pub total_detections: usize,
    pub phone_alerts: usize,
    pub smoking_alerts: usize,
    /// Share of recent processed frames with a phone in view
    pub phone_detection_rate: f64,
    pub smoking_detection_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorStatus {
    #[serde(flatten)]
    pub result: BehaviorResult,
}

/// Reports and audio for behavior alerts
#[derive(Debug, Clone)]
pub struct BehaviorMonitor {
    detector: BehaviorDetector,
    reports: CooldownManager,
    history: VecDeque<HistoryEntry>,
    stats: BehaviorSessionStats,
}

impl BehaviorMonitor {
    pub fn new(thresholds: BehaviorThresholds, report_cooldown: f64) -> Self {
        Self {
            detector: BehaviorDetector::new(thresholds),
            reports: CooldownManager::new(CooldownConfig::with_default(report_cooldown)),
            history: VecDeque::with_capacity(HISTORY_SIZE),
            stats: BehaviorSessionStats::default(),
        }
    }

    pub fn detector(&self) -> &BehaviorDetector {
        &self.detector
    }

    /// See [`BehaviorDetector::tick`]
    pub fn tick(&mut self) -> bool {
        self.detector.tick()
    }

    pub fn set_thresholds(&mut self, thresholds: BehaviorThresholds) {
        self.detector.set_thresholds(thresholds);
        self.history.clear();
    }

    pub fn session_stats(&self) -> BehaviorSessionStats {
        let n = self.history.len().max(1) as f64;
        BehaviorSessionStats {
            phone_detection_rate: self.history.iter().filter(|h| h.has_phone).count() as f64 / n,
            smoking_detection_rate: self.history.iter().filter(|h| h.has_cigarette).count() as f64 / n,
            ..self.stats.clone()
        }
    }

    pub fn process(
        &mut self,
        objects: Option<&[ObjectDetection]>,
        face: Option<&FaceRect>,
        light_level: f64,
        now: f64,
        out: &mut Emitted,
    ) -> BehaviorStatus {
        let result = self.detector.detect(objects, face, light_level, now);
        let kind = DetectorKind::Behavior;
        let t = self.detector.thresholds();

        for a in &result.alerts {
            let (severity, message, data, audio) = match a.alert_type.as_str() {
                "phone_3s" | "phone_7s" => {
                    let critical = a.alert_type == "phone_7s";
                    let threshold = if critical {
                        t.phone_alert_threshold_2
                    } else {
                        t.phone_alert_threshold_1
                    };
                    self.stats.phone_alerts += 1;
                    (
                        if critical { Severity::Critical } else { Severity::Warning },
                        format!("Phone in use for {:.0}s", a.value),
                        json!({
                            "behavior": a.behavior.label(),
                            "duration": a.value,
                            "threshold": threshold,
                            "severity": if critical { "critical" } else { "warning" },
                        }),
                        "telefono",
                    )
                }
                _ => {
                    let pattern = a.alert_type == "smoking_pattern";
                    self.stats.smoking_alerts += 1;
                    (
                        Severity::Warning,
                        if pattern {
                            format!("Smoking pattern: {} sightings", a.value)
                        } else {
                            format!("Smoking for {:.0}s", a.value)
                        },
                        json!({
                            "behavior": a.behavior.label(),
                            "detection_count": pattern.then_some(a.value as u64),
                            "duration": (!pattern).then_some(a.value),
                            "pattern_type": a.alert_type,
                            "severity": "warning",
                        }),
                        "cigarro",
                    )
                }
            };

            out.alert(kind, &a.alert_type, severity, message, now);
            out.audio(AudioCue::play(audio));

            if self.reports.try_fire(&a.alert_type, now) {
                let mut data = data;
                if let Some(map) = data.as_object_mut() {
                    map.insert("is_night_mode".into(), json!(result.is_night_mode));
                    map.insert("light_level".into(), json!(result.light_level));
                    map.insert("detection_timestamp".into(), json!(now));
                }
                out.report(kind, &a.alert_type, data);
            } else {
                debug!("Behavior report {} suppressed by cooldown", a.alert_type);
            }
        }

        if result.processed {
            self.stats.total_detections += 1;
            if self.history.len() == HISTORY_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(HistoryEntry {
                has_phone: result.detections.iter().any(|d| d.label == PHONE_LABEL),
                has_cigarette: result.detections.iter().any(|d| d.label == CIGARETTE_LABEL),
                alerts: result.alerts.len(),
            });
        }

        BehaviorStatus { result }
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.reports.clear();
        self.history.clear();
        self.stats = BehaviorSessionStats::default();
    }
}
