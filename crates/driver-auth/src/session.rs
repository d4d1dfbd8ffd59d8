//! Who is at the controls, frame after frame
//!
//! Tracks operator changes, plays the welcome and unregistered messages,
//! and escalates a face that stays unregistered: the warning repeats at
//! fixed marks and a report is filed once the last mark passes.

use crate::recognizer::UNKNOWN_NAME;
use crate::{AuthConfig, Identity};
use alerting::{AudioCue, CooldownConfig, CooldownManager};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

pub const WELCOME_AUDIO: &str = "bienvenido";
pub const UNREGISTERED_AUDIO: &str = "no_registrado";
pub const UNKNOWN_OPERATOR_EVENT: &str = "unknown_operator_15min";

/// Operator currently identified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentOperator {
    pub id: String,
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Announced {
    Operator(String),
    Unknown,
}

/// Report data for an operator that stayed unregistered too long
#[derive(Debug, Clone, Serialize)]
pub struct UnknownOperatorReport {
    pub event_type: &'static str,
    pub duration_seconds: f64,
    pub duration_minutes: f64,
    pub threshold_minutes: f64,
    pub timestamp: f64,
    pub message: String,
    pub operator_id: &'static str,
    pub operator_name: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub session_start: f64,
    pub total_recognitions: u64,
    pub successful_recognitions: u64,
    pub unknown_detections: u64,
    pub operators_detected: BTreeSet<String>,
    pub unknown_operator_reports: u64,
}

/// Result of feeding one identification to the session
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// Set when a registered operator takes over
    pub operator_changed: Option<CurrentOperator>,
    /// The previous operator is no longer in front of the camera
    pub operator_left: bool,
    pub audio: Vec<AudioCue>,
    pub report: Option<UnknownOperatorReport>,
}

pub struct OperatorSession {
    current: Option<CurrentOperator>,
    announced: Option<Announced>,
    welcome: CooldownManager,
    unknown_audio_marks: Vec<f64>,
    unknown_report_after: f64,
    unknown_since: Option<f64>,
    unknown_marks_played: Vec<f64>,
    unknown_reported: bool,
    stats: SessionStats,
}

impl OperatorSession {
    pub fn new(config: &AuthConfig, now: f64) -> Self {
        Self {
            current: None,
            announced: None,
            welcome: CooldownManager::new(CooldownConfig::with_default(config.welcome_delay_secs)),
            unknown_audio_marks: config.unknown_audio_minutes.iter().map(|m| m * 60.0).collect(),
            unknown_report_after: config.unknown_report_minutes * 60.0,
            unknown_since: None,
            unknown_marks_played: Vec::new(),
            unknown_reported: false,
            stats: SessionStats {
                session_start: now,
                ..Default::default()
            },
        }
    }

    pub fn current_operator(&self) -> Option<&CurrentOperator> {
        self.current.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_unknown_active(&self) -> bool {
        self.unknown_since.is_some()
    }

    /// Seconds the current unknown face has been present
    pub fn unknown_time(&self, now: f64) -> f64 {
        self.unknown_since.map(|t| now - t).unwrap_or(0.0)
    }

    /// Feed one identification; `None` means no face in the frame
    pub fn update(&mut self, identity: Option<&Identity>, now: f64) -> SessionUpdate {
        self.stats.total_recognitions += 1;
        let mut update = SessionUpdate::default();

        match identity {
            Some(Identity::Recognized {
                operator_id,
                name,
                confidence,
                ..
            }) => {
                self.stats.successful_recognitions += 1;
                self.reset_unknown(now);

                if self.announced.as_ref() != Some(&Announced::Operator(operator_id.clone())) {
                    if self.welcome.try_fire(WELCOME_AUDIO, now) {
                        update.audio.push(AudioCue::play(WELCOME_AUDIO));
                    }
                    self.announced = Some(Announced::Operator(operator_id.clone()));
                }

                let changed = self.current.as_ref().map(|c| c.id.as_str()) != Some(operator_id.as_str());
                let operator = CurrentOperator {
                    id: operator_id.clone(),
                    name: name.clone(),
                    confidence: *confidence,
                };
                if changed {
                    info!("Operator detected: {} ({})", name, operator_id);
                    self.stats.operators_detected.insert(operator_id.clone());
                    update.operator_changed = Some(operator.clone());
                }
                self.current = Some(operator);
            }
            Some(Identity::Unknown { .. }) => {
                self.stats.unknown_detections += 1;
                if self.announced != Some(Announced::Unknown) {
                    update.audio.push(AudioCue::play(UNREGISTERED_AUDIO));
                    self.announced = Some(Announced::Unknown);
                }
                self.escalate_unknown(now, &mut update);
                update.operator_left = self.drop_current();
            }
            None => {
                self.announced = None;
                self.reset_unknown(now);
                update.operator_left = self.drop_current();
            }
        }
        update
    }

    fn drop_current(&mut self) -> bool {
        match self.current.take() {
            Some(op) => {
                info!("Operator {} is no longer present", op.name);
                true
            }
            None => false,
        }
    }

    fn escalate_unknown(&mut self, now: f64, update: &mut SessionUpdate) {
        let since = *self.unknown_since.get_or_insert_with(|| {
            warn!("Unregistered operator detected");
            now
        });
        let elapsed = now - since;

        for &mark in &self.unknown_audio_marks {
            if elapsed >= mark && !self.unknown_marks_played.contains(&mark) {
                self.unknown_marks_played.push(mark);
                warn!("Unregistered operator present for {:.0} minutes", mark / 60.0);
                update.audio.push(AudioCue::play(UNREGISTERED_AUDIO));
            }
        }

        if elapsed >= self.unknown_report_after && !self.unknown_reported {
            update.report = Some(self.unknown_report(elapsed, now));
        }
    }

    fn unknown_report(&mut self, elapsed: f64, now: f64) -> UnknownOperatorReport {
        self.unknown_reported = true;
        self.stats.unknown_operator_reports += 1;
        warn!("Unregistered operator report after {:.1} minutes", elapsed / 60.0);
        UnknownOperatorReport {
            event_type: "unknown_operator",
            duration_seconds: elapsed,
            duration_minutes: elapsed / 60.0,
            threshold_minutes: self.unknown_report_after / 60.0,
            timestamp: now,
            message: format!("Unregistered operator detected for {:.1} minutes", elapsed / 60.0),
            operator_id: "UNKNOWN",
            operator_name: UNKNOWN_NAME,
        }
    }

    /// Report the active unknown operator immediately, if there is one
    pub fn force_unknown_report(&mut self, now: f64) -> Option<UnknownOperatorReport> {
        let since = self.unknown_since?;
        Some(self.unknown_report(now - since, now))
    }

    fn reset_unknown(&mut self, now: f64) {
        if let Some(since) = self.unknown_since.take() {
            if now - since > 10.0 {
                info!("Unregistered operator was present for {:.0} seconds", now - since);
            }
        }
        self.unknown_marks_played.clear();
        self.unknown_reported = false;
    }

    pub fn reset(&mut self, now: f64) {
        self.current = None;
        self.announced = None;
        self.welcome.clear();
        self.reset_unknown(now);
        self.stats = SessionStats {
            session_start: now,
            ..Default::default()
        };
        info!("Operator session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(id: &str) -> Identity {
        Identity::Recognized {
            operator_id: id.to_string(),
            name: format!("Operator {}", id),
            confidence: 0.8,
            distance: 0.2,
        }
    }

    fn unknown() -> Identity {
        Identity::Unknown { best_distance: Some(0.9) }
    }

    fn plays(update: &SessionUpdate, key: &str) -> usize {
        update.audio.iter().filter(|c| **c == AudioCue::play(key)).count()
    }

    #[test]
    fn test_welcome_once_per_operator() {
        let mut s = OperatorSession::new(&AuthConfig::default(), 0.0);
        let first = s.update(Some(&known("OP1")), 0.0);
        assert_eq!(plays(&first, WELCOME_AUDIO), 1);
        assert_eq!(first.operator_changed.as_ref().map(|o| o.id.as_str()), Some("OP1"));

        let again = s.update(Some(&known("OP1")), 1.0);
        assert!(again.audio.is_empty());
        assert!(again.operator_changed.is_none());
        assert_eq!(s.stats().successful_recognitions, 2);
    }

    #[test]
    fn test_welcome_delay_between_operators() {
        let mut s = OperatorSession::new(&AuthConfig::default(), 0.0);
        s.update(Some(&known("OP1")), 0.0);
        let swap = s.update(Some(&known("OP2")), 2.0);
        assert!(swap.operator_changed.is_some());
        assert_eq!(plays(&swap, WELCOME_AUDIO), 0);

        s.update(None, 3.0);
        let back = s.update(Some(&known("OP2")), 10.0);
        assert_eq!(plays(&back, WELCOME_AUDIO), 1);
        assert_eq!(s.stats().operators_detected.len(), 2);
    }

    #[test]
    fn test_unknown_announced_once_and_drops_operator() {
        let mut s = OperatorSession::new(&AuthConfig::default(), 0.0);
        s.update(Some(&known("OP1")), 0.0);
        let u = s.update(Some(&unknown()), 1.0);
        assert!(u.operator_left);
        assert_eq!(plays(&u, UNREGISTERED_AUDIO), 1);
        assert!(s.current_operator().is_none());

        let u2 = s.update(Some(&unknown()), 2.0);
        assert!(u2.audio.is_empty());
        assert!(s.is_unknown_active());
    }

    #[test]
    fn test_unknown_escalation_and_report() {
        let mut s = OperatorSession::new(&AuthConfig::default(), 0.0);
        let mut audio = 0;
        let mut reports = Vec::new();
        let mut t = 0.0;
        while t <= 16.0 * 60.0 {
            let u = s.update(Some(&unknown()), t);
            audio += plays(&u, UNREGISTERED_AUDIO);
            reports.extend(u.report);
            t += 30.0;
        }
        // initial + 5, 10 and 15 minute marks
        assert_eq!(audio, 4);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].duration_minutes, 15.0);
        assert_eq!(reports[0].operator_id, "UNKNOWN");
        assert_eq!(s.stats().unknown_operator_reports, 1);
    }

    #[test]
    fn test_no_face_resets_unknown() {
        let mut s = OperatorSession::new(&AuthConfig::default(), 0.0);
        s.update(Some(&unknown()), 0.0);
        s.update(Some(&unknown()), 200.0);
        assert_eq!(s.unknown_time(250.0), 250.0);
        s.update(None, 250.0);
        assert!(!s.is_unknown_active());
        let back = s.update(Some(&unknown()), 260.0);
        assert_eq!(plays(&back, UNREGISTERED_AUDIO), 1);
        assert_eq!(s.unknown_time(260.0), 0.0);
    }

    #[test]
    fn test_force_report() {
        let mut s = OperatorSession::new(&AuthConfig::default(), 0.0);
        assert!(s.force_unknown_report(5.0).is_none());
        s.update(Some(&unknown()), 10.0);
        let report = s.force_unknown_report(70.0).unwrap();
        assert_eq!(report.duration_seconds, 60.0);
        s.reset(80.0);
        assert_eq!(s.stats().unknown_operator_reports, 0);
        assert_eq!(s.stats().session_start, 80.0);
    }
}
