//! One pass of every analyzer per frame, folded into a single risk score
//!
//! Besides the per-frame assessment, a few conditions have to hold for a
//! while before they are worth a report: both stress and fatigue critical,
//! an abnormal pulse, or one of the anomaly families above its floor. Each
//! report type then waits out a cooldown.

use crate::anomaly::{AnomalyAnalysis, AnomalyDetector, AnomalyKind};
use crate::emotion::{EmotionAnalysis, EmotionAnalyzer};
use crate::fatigue::{FatigueAnalysis, FatigueAnalyzer};
use crate::pulse::{PulseEstimator, PulseReading};
use crate::stress::{StressAnalysis, StressAnalyzer};
use alerting::{CooldownConfig, CooldownManager};
use calibration::AnalysisBaseline;
use camera_capture::{FaceLandmarks, VideoFrame};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use tracing::{info, warn};

pub const REPORT_MODULE: &str = "analysis";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enable_emotion: bool,
    pub enable_stress: bool,
    pub enable_pulse: bool,
    pub enable_anomaly: bool,
    /// Minimum seconds between two reports of the same type
    pub report_cooldown_secs: f64,
    /// Risk scores kept for trend analysis
    pub history_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enable_emotion: true,
            enable_stress: true,
            enable_pulse: true,
            enable_anomaly: true,
            report_cooldown_secs: 60.0,
            history_size: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Optimal,
    Normal,
    Attention,
    Critical,
}

impl RiskStatus {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=24 => Self::Optimal,
            25..=49 => Self::Normal,
            50..=74 => Self::Attention,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    InsufficientData,
    Improving,
    Stable,
    Worsening,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallAssessment {
    pub risk_score: u32,
    pub status: RiskStatus,
    pub alerts: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Report to be written by the caller under [`REPORT_MODULE`]
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub event_type: &'static str,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegratedAnalysis {
    pub timestamp: f64,
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    pub face_detected: bool,
    pub fatigue: FatigueAnalysis,
    pub stress: Option<StressAnalysis>,
    pub emotion: Option<EmotionAnalysis>,
    pub pulse: Option<PulseReading>,
    pub anomaly: Option<AnomalyAnalysis>,
    pub overall: OverallAssessment,
    #[serde(skip)]
    pub reports: Vec<AnalysisReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisStats {
    pub frames_analyzed: u64,
    pub alerts_generated: u64,
    pub reports_generated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub operator_id: Option<String>,
    pub is_calibrated: bool,
    pub average_risk: f64,
    pub trend: Trend,
    pub stats: AnalysisStats,
}

/// A condition that must hold for `hold_secs` before it is reported
struct Sustained {
    event_type: &'static str,
    hold_secs: f64,
    since: Option<f64>,
}

impl Sustained {
    fn new(event_type: &'static str, hold_secs: f64) -> Self {
        Self {
            event_type,
            hold_secs,
            since: None,
        }
    }
}

fn sustained_conditions() -> Vec<Sustained> {
    vec![
        Sustained::new("critical_stress_fatigue", 10.0),
        Sustained::new("abnormal_pulse", 10.0),
        Sustained::new(AnomalyKind::Intoxication.event_type(), 8.0),
        Sustained::new(AnomalyKind::Neurological.event_type(), 5.0),
        Sustained::new(AnomalyKind::Erratic.event_type(), 10.0),
    ]
}

fn risk_score(fatigue: u32, stress: u32, negative_emotion: u32, anomaly: u32) -> u32 {
    let emotion = (2.0 * negative_emotion as f64).min(100.0);
    let risk = 0.30 * fatigue as f64 + 0.25 * stress as f64 + 0.20 * emotion + 0.25 * anomaly as f64;
    risk.clamp(0.0, 100.0).round() as u32
}

pub struct OperatorAnalyzer {
    config: AnalysisConfig,
    fatigue: FatigueAnalyzer,
    stress: StressAnalyzer,
    emotion: EmotionAnalyzer,
    pulse: PulseEstimator,
    anomaly: AnomalyDetector,
    operator: Option<(String, String)>,
    calibrated: bool,
    conditions: Vec<Sustained>,
    cooldowns: CooldownManager,
    history: VecDeque<u32>,
    stats: AnalysisStats,
}

impl OperatorAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        let cooldowns = CooldownManager::new(CooldownConfig::with_default(config.report_cooldown_secs));
        Self {
            fatigue: FatigueAnalyzer::new(),
            stress: StressAnalyzer::new(),
            emotion: EmotionAnalyzer::new(),
            pulse: PulseEstimator::new(),
            anomaly: AnomalyDetector::new(),
            operator: None,
            calibrated: false,
            conditions: sustained_conditions(),
            cooldowns,
            history: VecDeque::with_capacity(config.history_size),
            stats: AnalysisStats::default(),
            config,
        }
    }

    /// Switch operator: every analyzer restarts and picks up the baseline
    pub fn set_operator(&mut self, operator_id: &str, name: &str, baseline: Option<&AnalysisBaseline>) {
        self.reset();
        self.fatigue.set_baseline(baseline);
        self.emotion.set_baseline(baseline);
        self.pulse.set_baseline(baseline);
        self.calibrated = baseline.is_some();
        self.operator = Some((operator_id.to_string(), name.to_string()));
        info!(
            "Analysis operator set to {} ({}), calibrated: {}",
            name, operator_id, self.calibrated
        );
    }

    pub fn clear_operator(&mut self) {
        self.reset();
        self.fatigue.set_baseline(None);
        self.emotion.set_baseline(None);
        self.pulse.set_baseline(None);
        self.calibrated = false;
        self.operator = None;
    }

    pub fn fatigue_level(&self) -> u32 {
        self.fatigue.level()
    }

    pub fn analyze(&mut self, frame: &VideoFrame, landmarks: Option<&FaceLandmarks>, now: f64) -> IntegratedAnalysis {
        self.stats.frames_analyzed += 1;
        let fatigue = self.fatigue.analyze(landmarks, now);
        let (operator_id, operator_name) = match &self.operator {
            Some((id, name)) => (Some(id.clone()), Some(name.clone())),
            None => (None, None),
        };

        let Some(landmarks) = landmarks else {
            for c in &mut self.conditions {
                c.since = None;
            }
            let risk = risk_score(fatigue.fatigue_percentage, 0, 0, 0);
            return IntegratedAnalysis {
                timestamp: now,
                operator_id,
                operator_name,
                face_detected: false,
                fatigue,
                stress: None,
                emotion: None,
                pulse: None,
                anomaly: None,
                overall: OverallAssessment {
                    risk_score: risk,
                    status: RiskStatus::from_score(risk),
                    alerts: Vec::new(),
                    recommendations: Vec::new(),
                },
                reports: Vec::new(),
            };
        };

        let stress = self.config.enable_stress.then(|| self.stress.analyze(landmarks, now));
        let emotion = self.config.enable_emotion.then(|| self.emotion.analyze(landmarks));
        let pulse = self.config.enable_pulse.then(|| self.pulse.analyze(frame, landmarks, now));
        let dominant = emotion.as_ref().map(|e| e.dominant_emotion);
        let anomaly = self.config.enable_anomaly.then(|| self.anomaly.analyze(landmarks, dominant));

        let mut analysis = IntegratedAnalysis {
            timestamp: now,
            operator_id,
            operator_name,
            face_detected: true,
            overall: self.assess(&fatigue, stress.as_ref(), emotion.as_ref(), pulse.as_ref(), anomaly.as_ref()),
            fatigue,
            stress,
            emotion,
            pulse,
            anomaly,
            reports: Vec::new(),
        };
        analysis.reports = self.check_reports(&analysis, now);

        if self.history.len() == self.config.history_size.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(analysis.overall.risk_score);
        self.stats.alerts_generated += analysis.overall.alerts.len() as u64;
        analysis
    }

    fn assess(
        &self,
        fatigue: &FatigueAnalysis,
        stress: Option<&StressAnalysis>,
        emotion: Option<&EmotionAnalysis>,
        pulse: Option<&PulseReading>,
        anomaly: Option<&AnomalyAnalysis>,
    ) -> OverallAssessment {
        let fatigue_level = fatigue.fatigue_percentage;
        let stress_level = stress.map(|s| s.stress_level).unwrap_or(0);
        let negative = emotion.map(|e| e.emotions.negative()).unwrap_or(0);
        let anomaly_score = anomaly.map(|a| a.anomaly_score).unwrap_or(0);
        let risk = risk_score(fatigue_level, stress_level, negative, anomaly_score);

        let mut alerts = Vec::new();
        if fatigue.is_critical {
            alerts.push("Critical fatigue level".to_string());
        } else if fatigue.microsleep_detected {
            alerts.push("Microsleep detected".to_string());
        }
        if stress_level > 80 {
            alerts.push("Very high stress".to_string());
        }
        if let Some(p) = pulse.filter(|p| p.is_valid) {
            if p.bpm > 120 {
                alerts.push(format!("High heart rate ({} bpm)", p.bpm));
            } else if p.bpm < 50 {
                alerts.push(format!("Low heart rate ({} bpm)", p.bpm));
            }
        }
        if let Some(a) = anomaly {
            alerts.extend(a.alerts.iter().map(|s| s.to_string()));
        }

        let mut recommendations = Vec::new();
        if fatigue_level > 80 {
            recommendations.push("Take a break immediately".to_string());
        } else if fatigue_level > 60 {
            recommendations.push("Take a short break soon".to_string());
        }
        if stress_level > 70 {
            recommendations.push("Do some breathing exercises".to_string());
        }
        if fatigue_level > 60 && stress_level > 60 {
            recommendations.insert(0, "Request relief from your supervisor".to_string());
        }
        if let Some(a) = anomaly {
            for r in &a.recommendations {
                if !recommendations.iter().any(|x| x == r) {
                    recommendations.push(r.to_string());
                }
            }
        }

        OverallAssessment {
            risk_score: risk,
            status: RiskStatus::from_score(risk),
            alerts,
            recommendations,
        }
    }

    fn check_reports(&mut self, analysis: &IntegratedAnalysis, now: f64) -> Vec<AnalysisReport> {
        let fatigue = analysis.fatigue.fatigue_percentage;
        let stress = analysis.stress.as_ref().map(|s| s.stress_level).unwrap_or(0);
        let pulse = analysis.pulse.as_ref().filter(|p| p.is_valid).map(|p| p.bpm);
        let anomaly = |kind: AnomalyKind| analysis.anomaly.as_ref().map(|a| a.score_of(kind)).unwrap_or(0);

        let mut reports = Vec::new();
        for condition in &mut self.conditions {
            let active = match condition.event_type {
                "critical_stress_fatigue" => stress >= 80 && fatigue >= 80,
                "abnormal_pulse" => pulse.is_some_and(|b| !(50..=120).contains(&b)),
                "anomaly_intoxication" => anomaly(AnomalyKind::Intoxication) >= 40,
                "anomaly_neurological" => anomaly(AnomalyKind::Neurological) >= 30,
                "anomaly_erratic" => anomaly(AnomalyKind::Erratic) >= 50,
                _ => false,
            };
            if !active {
                condition.since = None;
                continue;
            }
            let since = *condition.since.get_or_insert(now);
            let held = now - since;
            if held < condition.hold_secs || !self.cooldowns.try_fire(condition.event_type, now) {
                continue;
            }
            condition.since = None;
            warn!("Analysis report: {} held for {:.1}s", condition.event_type, held);
            reports.push(AnalysisReport {
                event_type: condition.event_type,
                data: json!({
                    "event_type": condition.event_type,
                    "timestamp": now,
                    "duration_seconds": held,
                    "operator_id": analysis.operator_id,
                    "operator_name": analysis.operator_name,
                    "risk_score": analysis.overall.risk_score,
                    "status": analysis.overall.status,
                    "fatigue_percentage": fatigue,
                    "stress_level": stress,
                    "pulse_bpm": pulse,
                    "dominant_emotion": analysis.emotion.as_ref().map(|e| e.dominant_emotion),
                    "anomaly": analysis.anomaly,
                    "alerts": analysis.overall.alerts,
                }),
            });
        }
        self.stats.reports_generated += reports.len() as u64;
        reports
    }

    /// Risk trend comparing the oldest and newest 30 entries
    pub fn trend(&self) -> Trend {
        if self.history.len() <= 60 {
            return Trend::InsufficientData;
        }
        let first = self.history.iter().take(30).map(|v| *v as f64).sum::<f64>() / 30.0;
        let last = self.history.iter().rev().take(30).map(|v| *v as f64).sum::<f64>() / 30.0;
        if last - first > 10.0 {
            Trend::Worsening
        } else if first - last > 10.0 {
            Trend::Improving
        } else {
            Trend::Stable
        }
    }

    pub fn summary(&self) -> AnalysisSummary {
        let average_risk = if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().map(|v| *v as f64).sum::<f64>() / self.history.len() as f64
        };
        AnalysisSummary {
            operator_id: self.operator.as_ref().map(|o| o.0.clone()),
            is_calibrated: self.calibrated,
            average_risk,
            trend: self.trend(),
            stats: self.stats.clone(),
        }
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    pub fn reset(&mut self) {
        self.fatigue.reset();
        self.stress.reset();
        self.emotion.reset();
        self.pulse.reset();
        self.anomaly.reset();
        self.conditions = sustained_conditions();
        self.cooldowns.clear();
        self.history.clear();
    }
}
