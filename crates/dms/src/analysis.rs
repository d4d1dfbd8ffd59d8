//! DMS analysis results, alerts and report requests

use crate::behavior::BehaviorStatus;
use crate::distraction::DistractionStatus;
use crate::fatigue::FatigueStatus;
use crate::yawn::YawnStatus;
use alerting::AudioCue;
use serde::{Deserialize, Serialize};

/// Detector that raised an event; doubles as the report module name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Fatigue,
    Yawn,
    Distraction,
    Behavior,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatigue => "fatigue",
            Self::Yawn => "yawn",
            Self::Distraction => "distraction",
            Self::Behavior => "behavior",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

/// DMS alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmsAlert {
    pub detector: DetectorKind,
    /// e.g. `critical_fatigue`, `phone_7s`
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: f64,
}

/// A report the caller should write (frame attached when `include_frame`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub detector: DetectorKind,
    pub event_type: String,
    pub data: serde_json::Value,
    pub include_frame: bool,
}

/// Side effects collected while analysing one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Emitted {
    pub alerts: Vec<DmsAlert>,
    pub audio: Vec<AudioCue>,
    pub reports: Vec<ReportRequest>,
}

impl Emitted {
    pub fn alert(&mut self, detector: DetectorKind, alert_type: &str, severity: Severity, message: String, now: f64) {
        self.alerts.push(DmsAlert {
            detector,
            alert_type: alert_type.to_string(),
            severity,
            message,
            timestamp: now,
        });
    }

    pub fn report(&mut self, detector: DetectorKind, event_type: &str, data: serde_json::Value) {
        self.reports.push(ReportRequest {
            detector,
            event_type: event_type.to_string(),
            data,
            include_frame: true,
        });
    }

    pub fn audio(&mut self, cue: AudioCue) {
        self.audio.push(cue);
    }
}

/// Complete DMS analysis result
#[derive(Debug, Clone, Default, Serialize)]
pub struct DmsAnalysis {
    pub face_detected: bool,
    pub light_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatigue: Option<FatigueStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yawn: Option<YawnStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distraction: Option<DistractionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorStatus>,
    pub alerts: Vec<DmsAlert>,
    #[serde(skip)]
    pub audio: Vec<AudioCue>,
    #[serde(skip)]
    pub reports: Vec<ReportRequest>,
}

impl DmsAnalysis {
    pub fn has_alerts(&self) -> bool {
        !self.alerts.is_empty()
    }

    /// Most severe alert; the earliest wins ties
    pub fn highest_severity_alert(&self) -> Option<&DmsAlert> {
        self.alerts
            .iter()
            .rev()
            .max_by_key(|a| a.severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_severity() {
        let mut out = Emitted::default();
        out.alert(DetectorKind::Behavior, "phone_3s", Severity::Warning, "phone".into(), 1.0);
        out.alert(DetectorKind::Fatigue, "prolonged_closure", Severity::Critical, "eyes".into(), 1.0);
        out.alert(DetectorKind::Fatigue, "multiple_microsleeps", Severity::Critical, "3".into(), 1.0);

        let analysis = DmsAnalysis {
            alerts: out.alerts,
            ..Default::default()
        };
        assert!(analysis.has_alerts());
        assert_eq!(analysis.highest_severity_alert().unwrap().alert_type, "prolonged_closure");
    }

    #[test]
    fn test_report_module_names() {
        assert_eq!(DetectorKind::Fatigue.as_str(), "fatigue");
        assert_eq!(DetectorKind::Distraction.as_str(), "distraction");
        assert_eq!(serde_json::to_string(&DetectorKind::Yawn).unwrap(), "\"yawn\"");
    }
}
