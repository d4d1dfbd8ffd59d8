//! Behavioural anomaly screening
//!
//! Three families of signs are scored from landmark geometry over a short
//! history: intoxication (wandering gaze, uneven eyes, drooping lids),
//! neurological (one-sided mouth droop, unsteady mouth, facial asymmetry)
//! and erratic behaviour (jumping expressions, restless head). These are
//! screening cues for a supervisor, not a diagnosis.

use crate::emotion::Emotion;
use calibration::statistics::std_dev;
use camera_capture::{FaceLandmarks, Point};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

const HISTORY: usize = 30;
/// Frames needed before history-based indicators count
const MIN_HISTORY: usize = 5;
const DROOPY_EAR: f64 = 0.18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Intoxication,
    Neurological,
    Erratic,
}

impl AnomalyKind {
    pub fn event_type(self) -> &'static str {
        match self {
            Self::Intoxication => "anomaly_intoxication",
            Self::Neurological => "anomaly_neurological",
            Self::Erratic => "anomaly_erratic",
        }
    }

    fn alert(self) -> &'static str {
        match self {
            Self::Intoxication => "Possible signs of intoxication",
            Self::Neurological => "Possible neurological signs",
            Self::Erratic => "Erratic behaviour detected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyLevel {
    Normal,
    Attention,
    Critical,
}

impl AnomalyLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=29 => Self::Normal,
            30..=69 => Self::Attention,
            _ => Self::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyAnalysis {
    pub anomaly_score: u32,
    pub level: AnomalyLevel,
    pub intoxication: u32,
    pub neurological: u32,
    pub erratic: u32,
    pub primary: Option<AnomalyKind>,
    pub alerts: Vec<&'static str>,
    pub recommendations: Vec<&'static str>,
}

impl AnomalyAnalysis {
    pub fn score_of(&self, kind: AnomalyKind) -> u32 {
        match kind {
            AnomalyKind::Intoxication => self.intoxication,
            AnomalyKind::Neurological => self.neurological,
            AnomalyKind::Erratic => self.erratic,
        }
    }
}

fn pct(v: f64) -> u32 {
    (v.clamp(0.0, 1.0) * 100.0).round() as u32
}

fn push<T>(history: &mut VecDeque<T>, value: T) {
    if history.len() == HISTORY {
        history.pop_front();
    }
    history.push_back(value);
}

fn values(history: &VecDeque<f64>) -> Vec<f64> {
    history.iter().copied().collect()
}

#[derive(Default)]
pub struct AnomalyDetector {
    gaze_offsets: VecDeque<f64>,
    ears: VecDeque<f64>,
    mouth_ratios: VecDeque<f64>,
    rotations: VecDeque<f64>,
    noses: VecDeque<Point>,
    emotions: VecDeque<Emotion>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&mut self, landmarks: &FaceLandmarks, emotion: Option<Emotion>) -> AnomalyAnalysis {
        let nose = landmarks.point(30);
        let eye_span = landmarks.eye_distance();
        if eye_span > 0.0 {
            let mid = landmarks.left_eye_center().midpoint(&landmarks.right_eye_center());
            push(&mut self.gaze_offsets, (mid.x - nose.x) / eye_span);
        }
        push(&mut self.ears, landmarks.average_ear());
        push(&mut self.mouth_ratios, landmarks.mouth_aspect_ratio());
        push(&mut self.rotations, landmarks.head_rotation_ratio());
        push(&mut self.noses, nose);
        if let Some(e) = emotion {
            push(&mut self.emotions, e);
        }

        let intoxication = pct(self.intoxication(landmarks));
        let neurological = pct(self.neurological(landmarks));
        let erratic = pct(self.erratic(landmarks));

        let scored = [
            (AnomalyKind::Intoxication, intoxication),
            (AnomalyKind::Neurological, neurological),
            (AnomalyKind::Erratic, erratic),
        ];
        let anomaly_score = intoxication.max(neurological).max(erratic);
        let primary = scored
            .iter()
            .filter(|(_, s)| *s > 0 && *s == anomaly_score)
            .map(|(k, _)| *k)
            .next();

        let alerts: Vec<&'static str> = scored
            .iter()
            .filter(|(_, s)| *s > 70)
            .map(|(k, _)| k.alert())
            .collect();
        for alert in &alerts {
            warn!("{} (score {})", alert, anomaly_score);
        }

        let recommendations = if anomaly_score > 70 {
            vec!["Stop operating the equipment", "Notify your supervisor"]
        } else if anomaly_score > 40 {
            vec!["Pay attention to how you feel", "Consider a short break"]
        } else {
            Vec::new()
        };

        AnomalyAnalysis {
            anomaly_score,
            level: AnomalyLevel::from_score(anomaly_score),
            intoxication,
            neurological,
            erratic,
            primary,
            alerts,
            recommendations,
        }
    }

    fn intoxication(&self, landmarks: &FaceLandmarks) -> f64 {
        let gaze = if self.gaze_offsets.len() >= MIN_HISTORY {
            (std_dev(&values(&self.gaze_offsets)) * 10.0).min(1.0)
        } else {
            0.0
        };
        let (l, r) = (landmarks.left_ear(), landmarks.right_ear());
        let coordination = ((l - r).abs() / l.max(r).max(0.01) * 2.0).min(1.0);
        let droopy = self.ears.iter().filter(|e| **e < DROOPY_EAR).count() as f64 / self.ears.len().max(1) as f64;
        0.4 * gaze + 0.3 * coordination + 0.3 * droopy
    }

    fn neurological(&self, landmarks: &FaceLandmarks) -> f64 {
        let mouth = landmarks.mouth();
        let width = mouth[0].distance(&mouth[6]);
        let droop = if width > 0.0 {
            ((mouth[0].y - mouth[6].y).abs() / width * 5.0).min(1.0)
        } else {
            0.0
        };
        let control = if self.mouth_ratios.len() >= MIN_HISTORY {
            (std_dev(&values(&self.mouth_ratios)) * 5.0).min(1.0)
        } else {
            0.0
        };
        let nose = landmarks.point(33);
        let (dl, dr) = (
            landmarks.left_eye_center().distance(&nose),
            landmarks.right_eye_center().distance(&nose),
        );
        let asymmetry = if dl.max(dr) > 0.0 {
            1.0 - dl.min(dr) / dl.max(dr)
        } else {
            0.0
        };
        0.5 * droop + 0.3 * control + 0.2 * asymmetry
    }

    fn erratic(&self, landmarks: &FaceLandmarks) -> f64 {
        let volatility = if self.emotions.len() >= MIN_HISTORY {
            let changes = self
                .emotions
                .iter()
                .zip(self.emotions.iter().skip(1))
                .filter(|(a, b)| a != b)
                .count();
            changes as f64 / (self.emotions.len() - 1) as f64
        } else {
            0.0
        };

        let face_width = landmarks.rect.width;
        let movement = if self.noses.len() >= MIN_HISTORY && face_width > 0.0 {
            let steps: Vec<f64> = self
                .noses
                .iter()
                .zip(self.noses.iter().skip(1))
                .map(|(a, b)| a.distance(b))
                .collect();
            (std_dev(&steps) / face_width * 20.0).min(1.0)
        } else {
            0.0
        };

        let instability = if self.rotations.len() >= MIN_HISTORY {
            (std_dev(&values(&self.rotations)) * 2.0).min(1.0)
        } else {
            0.0
        };
        0.4 * volatility + 0.3 * movement + 0.3 * instability
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::synthetic_face;

    fn with_moves(face: &FaceLandmarks, moves: &[(usize, f64)]) -> FaceLandmarks {
        let mut pts = face.points().to_vec();
        for &(i, dy) in moves {
            pts[i] = Point::new(pts[i].x, pts[i].y + dy);
        }
        FaceLandmarks::new(pts, face.rect).unwrap()
    }

    #[test]
    fn test_steady_face_is_normal() {
        let mut d = AnomalyDetector::new();
        let face = synthetic_face(0.3, 0.0);
        let mut r = None;
        for _ in 0..20 {
            r = Some(d.analyze(&face, Some(Emotion::Neutral)));
        }
        let r = r.unwrap();
        assert_eq!(r.anomaly_score, 0);
        assert_eq!(r.level, AnomalyLevel::Normal);
        assert!(r.primary.is_none());
        assert!(r.recommendations.is_empty());
    }

    #[test]
    fn test_mouth_droop_is_neurological() {
        let mut d = AnomalyDetector::new();
        let droop = with_moves(&synthetic_face(0.3, 0.0), &[(54, 10.0)]);
        let r = d.analyze(&droop, None);
        assert!(r.neurological >= 40, "{}", r.neurological);
        assert_eq!(r.primary, Some(AnomalyKind::Neurological));
        assert_eq!(r.level, AnomalyLevel::Attention);
    }

    #[test]
    fn test_uneven_drooping_eyes_suggest_intoxication() {
        let mut d = AnomalyDetector::new();
        // right eye nearly shut
        let face = with_moves(&synthetic_face(0.3, 0.0), &[(43, 4.0), (44, 4.0), (46, -4.0), (47, -4.0)]);
        let mut r = None;
        for _ in 0..10 {
            r = Some(d.analyze(&face, None));
        }
        let r = r.unwrap();
        assert!(r.intoxication >= 55, "{}", r.intoxication);
        assert_eq!(r.primary, Some(AnomalyKind::Intoxication));
    }

    #[test]
    fn test_restless_face_is_erratic() {
        let mut d = AnomalyDetector::new();
        let face = synthetic_face(0.3, 0.0);
        let emotions = [Emotion::Happy, Emotion::Angry, Emotion::Sad];
        let mut r = None;
        for i in 0..20 {
            let dx = ((i * i) % 7) as f64 * 6.0;
            r = Some(d.analyze(&face.translated(dx, 0.0), Some(emotions[i % 3])));
        }
        let r = r.unwrap();
        assert!(r.erratic > 40, "{}", r.erratic);
        assert_ne!(r.level, AnomalyLevel::Normal);
        assert!(!r.recommendations.is_empty());
    }

    #[test]
    fn test_levels() {
        assert_eq!(AnomalyLevel::from_score(29), AnomalyLevel::Normal);
        assert_eq!(AnomalyLevel::from_score(30), AnomalyLevel::Attention);
        assert_eq!(AnomalyLevel::from_score(70), AnomalyLevel::Critical);
        assert_eq!(AnomalyKind::Erratic.event_type(), "anomaly_erratic");
    }
}
