//! Rule-based emotion estimate from facial geometry
//!
//! Six ratios are measured per frame (smile, mouth opening, eyebrow raise,
//! inner-eyebrow gap, eye opening and left/right asymmetry) and a fixed set
//! of rules turns them into percentages for seven emotions. With a
//! calibrated baseline the eye and eyebrow ratios are rescaled so the
//! operator's resting face reads as a typical one.

use calibration::AnalysisBaseline;
use camera_capture::FaceLandmarks;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

const HISTORY: usize = 10;

/// Resting eye aspect ratio of a typical face
const TYPICAL_EYE_OPENING: f64 = 0.3;
/// Resting brow-to-eye distance over face width
const TYPICAL_EYEBROW_RAISE: f64 = 0.11;
/// Resting inner-eyebrow gap over eye-centre distance
const TYPICAL_BROW_GAP: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Fear,
    Disgust,
}

impl Emotion {
    pub fn is_negative(self) -> bool {
        matches!(self, Self::Sad | Self::Angry | Self::Fear | Self::Disgust)
    }
}

/// Normalised percentages, summing to roughly 100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EmotionScores {
    pub neutral: u32,
    pub happy: u32,
    pub sad: u32,
    pub angry: u32,
    pub surprised: u32,
    pub fear: u32,
    pub disgust: u32,
}

impl EmotionScores {
    pub fn get(&self, emotion: Emotion) -> u32 {
        match emotion {
            Emotion::Neutral => self.neutral,
            Emotion::Happy => self.happy,
            Emotion::Sad => self.sad,
            Emotion::Angry => self.angry,
            Emotion::Surprised => self.surprised,
            Emotion::Fear => self.fear,
            Emotion::Disgust => self.disgust,
        }
    }

    /// Sum of the negative emotions
    pub fn negative(&self) -> u32 {
        self.sad + self.angry + self.fear + self.disgust
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FacialMetrics {
    pub smile_ratio: f64,
    pub mouth_opening_ratio: f64,
    pub eyebrow_raise_ratio: f64,
    pub eyebrow_distance_ratio: f64,
    pub eye_opening_ratio: f64,
    pub facial_asymmetry: f64,
}

impl FacialMetrics {
    pub fn measure(landmarks: &FaceLandmarks) -> Self {
        let mouth = landmarks.mouth();
        let (left_corner, right_corner) = (mouth[0], mouth[6]);
        let width = left_corner.distance(&right_corner);
        // inner lip centres 62 and 66
        let (upper, lower) = (landmarks.point(62), landmarks.point(66));
        let centre_y = (upper.y + lower.y) / 2.0;
        let corners_y = (left_corner.y + right_corner.y) / 2.0;

        let (smile_ratio, mouth_opening_ratio) = if width > 0.0 {
            ((centre_y - corners_y) / width, upper.distance(&lower) / width)
        } else {
            (0.0, 0.0)
        };

        let face_width = landmarks.rect.width;
        let eyebrow_raise_ratio = if face_width > 0.0 {
            landmarks.eyebrow_distance() / face_width
        } else {
            0.0
        };

        let (left_eye, right_eye) = (landmarks.left_eye_center(), landmarks.right_eye_center());
        let eye_span = left_eye.distance(&right_eye);
        let eyebrow_distance_ratio = if eye_span > 0.0 {
            landmarks.point(21).distance(&landmarks.point(22)) / eye_span / TYPICAL_BROW_GAP
        } else {
            1.0
        };

        let nose = landmarks.point(33);
        let (dl, dr) = (left_eye.distance(&nose), right_eye.distance(&nose));
        let facial_asymmetry = if dl.max(dr) > 0.0 {
            (dl - dr).abs() / dl.max(dr)
        } else {
            0.0
        };

        Self {
            smile_ratio,
            mouth_opening_ratio,
            eyebrow_raise_ratio,
            eyebrow_distance_ratio,
            eye_opening_ratio: landmarks.average_ear(),
            facial_asymmetry,
        }
    }

    /// Rescale eye and eyebrow ratios against the operator's resting face
    fn adjusted(mut self, baseline: &AnalysisBaseline) -> Self {
        let facial = &baseline.facial_metrics;
        if facial.eye_openness.avg > 0.0 {
            self.eye_opening_ratio *= TYPICAL_EYE_OPENING / facial.eye_openness.avg;
        }
        if facial.face_width.avg > 0.0 && facial.eyebrow_distance.avg > 0.0 {
            let resting = facial.eyebrow_distance.avg / facial.face_width.avg;
            self.eyebrow_raise_ratio *= TYPICAL_EYEBROW_RAISE / resting;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmotionAnalysis {
    pub emotions: EmotionScores,
    pub dominant_emotion: Emotion,
    pub confidence: f64,
    /// 0-100, share of positive affect
    pub wellbeing: u32,
    /// -100..100
    pub valence: i32,
    /// 0-100
    pub arousal: u32,
    /// 1.0 when the dominant emotion has not changed recently
    pub stability: f64,
    pub metrics: FacialMetrics,
    pub is_calibrated: bool,
}

fn classify(m: &FacialMetrics) -> [(Emotion, f64); 7] {
    let mut neutral = 60.0;
    let mut happy = 0.0;
    let mut sad = 0.0;
    let mut angry = 0.0;
    let mut surprised = 0.0;
    let mut fear = 0.0;
    let mut disgust = 0.0;

    if m.smile_ratio > 0.03 {
        happy = 30.0 + 50.0 * (m.smile_ratio / 0.08).min(1.0);
        neutral -= 20.0;
    } else if m.smile_ratio < -0.01 {
        sad = 20.0 + 40.0 * (m.smile_ratio.abs() / 0.05).min(1.0);
        neutral -= 15.0;
    }
    if m.eyebrow_distance_ratio < 0.85 {
        angry = 20.0 + 50.0 * ((0.9 - m.eyebrow_distance_ratio) / 0.2).min(1.0);
        neutral -= 15.0;
    }
    if m.eye_opening_ratio > 0.35 && m.mouth_opening_ratio > 0.15 {
        surprised = 50.0;
        neutral -= 20.0;
    }
    if m.eye_opening_ratio > 0.32 && m.eyebrow_raise_ratio > 0.15 {
        fear = 40.0;
        neutral -= 15.0;
    }
    if m.facial_asymmetry > 0.3 {
        disgust = 30.0;
        neutral -= 10.0;
    }

    [
        (Emotion::Neutral, f64::max(neutral, 0.0)),
        (Emotion::Happy, happy),
        (Emotion::Sad, sad),
        (Emotion::Angry, angry),
        (Emotion::Surprised, surprised),
        (Emotion::Fear, fear),
        (Emotion::Disgust, disgust),
    ]
}

fn normalise(raw: &[(Emotion, f64); 7]) -> EmotionScores {
    let total: f64 = raw.iter().map(|(_, v)| v).sum();
    let pct = |e: Emotion| -> u32 {
        if total <= 0.0 {
            return if e == Emotion::Neutral { 100 } else { 0 };
        }
        raw.iter()
            .find(|(k, _)| *k == e)
            .map(|(_, v)| (v / total * 100.0).round() as u32)
            .unwrap_or(0)
    };
    EmotionScores {
        neutral: pct(Emotion::Neutral),
        happy: pct(Emotion::Happy),
        sad: pct(Emotion::Sad),
        angry: pct(Emotion::Angry),
        surprised: pct(Emotion::Surprised),
        fear: pct(Emotion::Fear),
        disgust: pct(Emotion::Disgust),
    }
}

const ORDER: [Emotion; 7] = [
    Emotion::Neutral,
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Angry,
    Emotion::Surprised,
    Emotion::Fear,
    Emotion::Disgust,
];

fn dominant(scores: &EmotionScores) -> Emotion {
    let mut best = Emotion::Neutral;
    for e in ORDER {
        if scores.get(e) > scores.get(best) {
            best = e;
        }
    }
    best
}

fn confidence(scores: &EmotionScores) -> f64 {
    let mut values: Vec<u32> = ORDER.iter().map(|e| scores.get(*e)).filter(|v| *v > 0).collect();
    values.sort_unstable_by(|a, b| b.cmp(a));
    match values.as_slice() {
        [] => 0.5,
        [_] => 1.0,
        [top, second, ..] => (*top - *second) as f64 / *top as f64,
    }
}

fn wellbeing(s: &EmotionScores) -> u32 {
    let positive = s.happy as f64 + 0.5 * s.neutral as f64;
    let total = positive + s.negative() as f64;
    if total > 0.0 {
        (positive / total * 100.0).round() as u32
    } else {
        50
    }
}

fn valence(s: &EmotionScores) -> i32 {
    (s.happy as i32 - (s.sad + s.angry + s.disgust) as i32).clamp(-100, 100)
}

fn arousal(s: &EmotionScores) -> u32 {
    let a = s.angry as f64 + s.surprised as f64 + s.fear as f64 + 0.7 * s.happy as f64
        - 0.3 * s.sad as f64
        - 0.1 * s.neutral as f64;
    a.clamp(0.0, 100.0).round() as u32
}

#[derive(Default)]
pub struct EmotionAnalyzer {
    baseline: Option<AnalysisBaseline>,
    history: VecDeque<Emotion>,
    last: Option<EmotionAnalysis>,
}

impl EmotionAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_baseline(&mut self, baseline: Option<&AnalysisBaseline>) {
        self.baseline = baseline.cloned();
    }

    pub fn last(&self) -> Option<&EmotionAnalysis> {
        self.last.as_ref()
    }

    pub fn analyze(&mut self, landmarks: &FaceLandmarks) -> EmotionAnalysis {
        let mut metrics = FacialMetrics::measure(landmarks);
        if let Some(baseline) = &self.baseline {
            metrics = metrics.adjusted(baseline);
        }

        let emotions = normalise(&classify(&metrics));
        let dominant_emotion = dominant(&emotions);
        if self.history.len() == HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(dominant_emotion);
        debug!("Dominant emotion {:?} ({}%)", dominant_emotion, emotions.get(dominant_emotion));

        let analysis = EmotionAnalysis {
            emotions,
            dominant_emotion,
            confidence: confidence(&emotions),
            wellbeing: wellbeing(&emotions),
            valence: valence(&emotions),
            arousal: arousal(&emotions),
            stability: self.stability(),
            metrics,
            is_calibrated: self.baseline.is_some(),
        };
        self.last = Some(analysis.clone());
        analysis
    }

    fn stability(&self) -> f64 {
        if self.history.len() < 3 {
            return 1.0;
        }
        let changes = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .filter(|(a, b)| a != b)
            .count();
        1.0 - changes as f64 / self.history.len() as f64
    }

    /// Recent dominant emotions, oldest first
    pub fn history(&self) -> impl Iterator<Item = Emotion> + '_ {
        self.history.iter().copied()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calibration::modules::analysis::AnalysisData;
    use calibration::AnalysisCalibration;
    use camera_capture::{synthetic_face, Point};

    fn moved(face: &FaceLandmarks, moves: &[(usize, f64, f64)]) -> FaceLandmarks {
        let mut pts = face.points().to_vec();
        for &(i, dx, dy) in moves {
            pts[i] = Point::new(pts[i].x + dx, pts[i].y + dy);
        }
        FaceLandmarks::new(pts, face.rect).unwrap()
    }

    #[test]
    fn test_resting_face_is_neutral() {
        let mut a = EmotionAnalyzer::new();
        let r = a.analyze(&synthetic_face(0.3, 0.0));
        assert_eq!(r.dominant_emotion, Emotion::Neutral);
        assert_eq!(r.emotions.neutral, 100);
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.valence, 0);
        assert!((r.metrics.eyebrow_distance_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_raised_corners_read_happy() {
        let mut a = EmotionAnalyzer::new();
        let smile = moved(&synthetic_face(0.3, 0.0), &[(48, 0.0, -4.0), (54, 0.0, -4.0)]);
        let r = a.analyze(&smile);
        assert_eq!(r.dominant_emotion, Emotion::Happy);
        assert!(r.valence > 0);
        assert!(r.wellbeing > 90);
    }

    #[test]
    fn test_knitted_brows_read_angry() {
        let mut a = EmotionAnalyzer::new();
        let frown = moved(&synthetic_face(0.3, 0.0), &[(21, 12.0, 0.0), (22, -12.0, 0.0)]);
        let r = a.analyze(&frown);
        assert_eq!(r.dominant_emotion, Emotion::Angry);
        assert!(r.emotions.negative() > 50);
        assert!(r.valence < 0);
    }

    #[test]
    fn test_wide_eyes_open_mouth_surprised() {
        let mut a = EmotionAnalyzer::new();
        let r = a.analyze(&synthetic_face(0.4, 0.2));
        assert!(r.emotions.surprised > 0);
        assert!(r.arousal > 0);
    }

    #[test]
    fn test_stability_drops_with_changes() {
        let mut a = EmotionAnalyzer::new();
        let calm = synthetic_face(0.3, 0.0);
        let frown = moved(&calm, &[(21, 12.0, 0.0), (22, -12.0, 0.0)]);
        for _ in 0..5 {
            a.analyze(&calm);
        }
        assert_eq!(a.last().unwrap().stability, 1.0);
        for i in 0..5 {
            a.analyze(if i % 2 == 0 { &frown } else { &calm });
        }
        assert!(a.last().unwrap().stability < 0.7);
        a.reset();
        assert_eq!(a.history().count(), 0);
    }

    #[test]
    fn test_baseline_rescales_eye_opening() {
        let data = AnalysisData {
            ear_values: vec![0.4; 5],
            ..Default::default()
        };
        let baseline = AnalysisCalibration::build_baseline("OP1", &data, 5);
        let mut a = EmotionAnalyzer::new();
        a.set_baseline(Some(&baseline));
        let r = a.analyze(&synthetic_face(0.4, 0.0));
        assert!((r.metrics.eye_opening_ratio - 0.3).abs() < 1e-6);
        assert!(r.is_calibrated);
    }
}
