//! Fatigue level from eye openness relative to the operator's resting face

use calibration::statistics::std_dev;
use calibration::AnalysisBaseline;
use camera_capture::FaceLandmarks;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{info, warn};

const OPENNESS_HISTORY: usize = 30;
const SCORE_HISTORY: usize = 10;
/// Closed time (seconds) that makes a microsleep
const MICROSLEEP_SECS: f64 = 0.5;
const MICROSLEEP_DEBOUNCE: f64 = 2.0;
/// Microsleep count resets after this long without one
const MICROSLEEP_RESET: f64 = 300.0;

const DEFAULT_OPENNESS: f64 = 0.25;
const DEFAULT_MICROSLEEP: f64 = 0.15;
const DEFAULT_SEVERE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatigueStatus {
    Normal,
    Mild,
    Moderate,
    Severe,
}

impl FatigueStatus {
    pub fn from_level(level: u32) -> Self {
        match level {
            0..=29 => Self::Normal,
            30..=59 => Self::Mild,
            60..=79 => Self::Moderate,
            _ => Self::Severe,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FatigueAnalysis {
    pub fatigue_percentage: u32,
    pub is_fatigued: bool,
    pub is_critical: bool,
    pub microsleep_detected: bool,
    pub microsleep_count: u32,
    pub eye_openness: Option<f64>,
    pub status: FatigueStatus,
    pub is_calibrated: bool,
}

pub struct FatigueAnalyzer {
    normal_openness: f64,
    microsleep_threshold: f64,
    severe_threshold: f64,
    calibrated: bool,
    openness: VecDeque<f64>,
    scores: VecDeque<f64>,
    level: u32,
    closed_since: Option<f64>,
    microsleeps: u32,
    last_microsleep: f64,
}

impl Default for FatigueAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FatigueAnalyzer {
    pub fn new() -> Self {
        Self {
            normal_openness: DEFAULT_OPENNESS,
            microsleep_threshold: DEFAULT_MICROSLEEP,
            severe_threshold: DEFAULT_SEVERE,
            calibrated: false,
            openness: VecDeque::with_capacity(OPENNESS_HISTORY),
            scores: VecDeque::with_capacity(SCORE_HISTORY),
            level: 0,
            closed_since: None,
            microsleeps: 0,
            last_microsleep: 0.0,
        }
    }

    /// Personal thresholds from a baseline, defaults without one
    pub fn set_baseline(&mut self, baseline: Option<&AnalysisBaseline>) {
        match baseline {
            Some(b) if b.facial_metrics.eye_openness.avg > 0.0 => {
                self.normal_openness = b.facial_metrics.eye_openness.avg;
                self.microsleep_threshold = b.thresholds.fatigue.microsleep;
                self.severe_threshold = b.thresholds.fatigue.severe;
                self.calibrated = true;
                info!("Fatigue baseline set, normal openness {:.3}", self.normal_openness);
            }
            _ => {
                self.normal_openness = DEFAULT_OPENNESS;
                self.microsleep_threshold = DEFAULT_MICROSLEEP;
                self.severe_threshold = DEFAULT_SEVERE;
                self.calibrated = false;
            }
        }
    }

    pub fn severe_threshold(&self) -> f64 {
        self.severe_threshold
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn analyze(&mut self, landmarks: Option<&FaceLandmarks>, now: f64) -> FatigueAnalysis {
        let Some(landmarks) = landmarks else {
            return FatigueAnalysis {
                fatigue_percentage: self.level,
                is_fatigued: false,
                is_critical: false,
                microsleep_detected: false,
                microsleep_count: 0,
                eye_openness: None,
                status: FatigueStatus::from_level(self.level),
                is_calibrated: self.calibrated,
            };
        };

        let openness = landmarks.average_ear();
        if self.openness.len() == OPENNESS_HISTORY {
            self.openness.pop_front();
        }
        self.openness.push_back(openness);
        self.track_microsleep(openness, now);

        let score = self.score(openness);
        if self.scores.len() == SCORE_HISTORY {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
        self.level = (self.scores.iter().sum::<f64>() / self.scores.len() as f64) as u32;

        FatigueAnalysis {
            fatigue_percentage: self.level,
            is_fatigued: self.level > 60,
            is_critical: self.level > 80,
            microsleep_detected: self.microsleeps > 0,
            microsleep_count: self.microsleeps,
            eye_openness: Some(openness),
            status: FatigueStatus::from_level(self.level),
            is_calibrated: self.calibrated,
        }
    }

    fn track_microsleep(&mut self, openness: f64, now: f64) {
        if openness < self.microsleep_threshold {
            match self.closed_since {
                None => self.closed_since = Some(now),
                Some(since) => {
                    if now - since >= MICROSLEEP_SECS && now - self.last_microsleep > MICROSLEEP_DEBOUNCE {
                        self.microsleeps += 1;
                        self.last_microsleep = now;
                        warn!("Microsleep #{} detected", self.microsleeps);
                    }
                }
            }
        } else {
            self.closed_since = None;
        }
        if now - self.last_microsleep > MICROSLEEP_RESET {
            self.microsleeps = 0;
        }
    }

    /// Instant score 0-100
    fn score(&self, openness: f64) -> f64 {
        let base = if self.calibrated {
            let deviation = ((self.normal_openness - openness) / self.normal_openness).max(0.0);
            (deviation * 150.0).min(100.0)
        } else if openness < 0.10 {
            90.0
        } else if openness < 0.15 {
            70.0
        } else if openness < 0.20 {
            50.0
        } else if openness < 0.25 {
            30.0
        } else {
            10.0
        };

        let microsleep_penalty = (self.microsleeps as f64 * 15.0).min(40.0);
        let variability_penalty = if self.openness.len() > 10 {
            let recent: Vec<f64> = self.openness.iter().rev().take(10).copied().collect();
            (std_dev(&recent) * 100.0).min(20.0)
        } else {
            0.0
        };
        (base + microsleep_penalty + variability_penalty).clamp(0.0, 100.0)
    }

    pub fn reset(&mut self) {
        self.level = 0;
        self.openness.clear();
        self.scores.clear();
        self.microsleeps = 0;
        self.closed_since = None;
        self.last_microsleep = 0.0;
    }
}
