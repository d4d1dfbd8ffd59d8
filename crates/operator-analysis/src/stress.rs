//! Stress from facial tension, micro-movements and eye strain

use calibration::statistics::std_dev;
use camera_capture::{FaceLandmarks, Point};
use serde::Serialize;
use std::collections::VecDeque;

const HISTORY: usize = 30;
/// Seconds of history kept
const TIME_WINDOW: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StressCategory {
    Low,
    Moderate,
    High,
    Critical,
}

impl StressCategory {
    pub fn from_level(level: u32) -> Self {
        match level {
            0..=29 => Self::Low,
            30..=59 => Self::Moderate,
            60..=79 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn recommendations(self) -> Vec<&'static str> {
        match self {
            Self::Low => vec!["Low stress level", "Carry on as normal"],
            Self::Moderate => vec!["Take deep breaths", "Take short breaks every hour"],
            Self::High => vec!["Consider a 10-15 minute break", "Do some relaxation exercises"],
            Self::Critical => vec![
                "HIGH STRESS DETECTED",
                "Take a break immediately",
                "Contact your supervisor",
            ],
        }
    }
}

/// Indicator percentages 0-100
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StressIndicators {
    pub tension: u32,
    pub movement: u32,
    pub stability: u32,
    pub eye_strain: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StressAnalysis {
    pub stress_level: u32,
    pub category: StressCategory,
    pub indicators: StressIndicators,
    pub recommendations: Vec<&'static str>,
}

fn pct(v: f64) -> u32 {
    (v.clamp(0.0, 1.0) * 100.0) as u32
}

fn mean_distance(a: &[Point], b: &[Point]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    (0..n).map(|i| a[i].distance(&b[i])).sum::<f64>() / n as f64
}

/// Mean deviation of the jaw contour from a half-circle around the chin
fn jaw_tension(jaw: &[Point]) -> f64 {
    if jaw.len() < 17 {
        return 0.0;
    }
    let center = jaw[8];
    let step = 180.0 / (jaw.len() - 1) as f64;
    let total: f64 = jaw
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let actual = (p.y - center.y).atan2(p.x - center.x).to_degrees();
            (i as f64 * step - actual).abs()
        })
        .sum();
    (total / jaw.len() as f64 / 45.0).min(1.0)
}

/// Lips pressed together: small vertical gap relative to mouth width
fn lip_compression(landmarks: &FaceLandmarks) -> f64 {
    let m = landmarks.mouth();
    let width = m[0].distance(&m[6]);
    if width <= 0.0 {
        return 0.0;
    }
    // outer upper lip 49..53 against lower lip 59..55
    let gap = (1..6).map(|i| m[i].distance(&m[12 - i])).sum::<f64>() / 5.0;
    1.0 - (gap / width * 5.0).min(1.0)
}

fn eye_squint(eye: &[Point]) -> Option<f64> {
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= 0.0 {
        return None;
    }
    let vertical = (eye[1].distance(&eye[5]) + eye[2].distance(&eye[4])) / 2.0;
    Some(1.0 - (vertical / horizontal * 3.0).min(1.0))
}

pub fn facial_tension(landmarks: &FaceLandmarks) -> f64 {
    let jaw_width = landmarks.jaw_width();
    let mut indicators = vec![jaw_tension(landmarks.jaw())];

    let brow_gap = landmarks.point(21).distance(&landmarks.point(22));
    if jaw_width > 0.0 {
        indicators.push((1.0 - brow_gap / jaw_width).clamp(0.0, 1.0));
    }
    indicators.push(lip_compression(landmarks));

    let squints: Vec<f64> = [landmarks.left_eye(), landmarks.right_eye()]
        .iter()
        .filter_map(|e| eye_squint(e))
        .collect();
    if !squints.is_empty() {
        indicators.push(squints.iter().sum::<f64>() / squints.len() as f64);
    }
    indicators.iter().sum::<f64>() / indicators.len() as f64
}

pub fn eye_strain(landmarks: &FaceLandmarks) -> f64 {
    let (left, right) = (landmarks.left_ear(), landmarks.right_ear());
    let closure = 1.0 - ((left + right) / 2.0 / 0.3).min(1.0);
    let asymmetry = ((left - right).abs() / left.max(right).max(0.01) * 2.0).min(1.0);
    (closure + asymmetry) / 2.0
}

pub struct StressAnalyzer {
    previous: Option<FaceLandmarks>,
    movements: VecDeque<(f64, f64)>,
    tensions: VecDeque<(f64, f64)>,
    level: u32,
}

impl Default for StressAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl StressAnalyzer {
    pub fn new() -> Self {
        Self {
            previous: None,
            movements: VecDeque::with_capacity(HISTORY),
            tensions: VecDeque::with_capacity(HISTORY),
            level: 0,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn micro_movement(&self, landmarks: &FaceLandmarks) -> f64 {
        let Some(prev) = &self.previous else {
            return 0.0;
        };
        let moves = [
            mean_distance(landmarks.nose_tip(), prev.nose_tip()),
            mean_distance(landmarks.jaw(), prev.jaw()),
            mean_distance(landmarks.left_eye(), prev.left_eye()),
            mean_distance(landmarks.right_eye(), prev.right_eye()),
        ];
        let width = landmarks.jaw_width();
        if width <= 0.0 {
            return 0.0;
        }
        let avg = moves.iter().sum::<f64>() / moves.len() as f64;
        (avg / width * 50.0).min(1.0)
    }

    fn stability(&self) -> f64 {
        if self.movements.len() < 5 {
            return 1.0;
        }
        let recent: Vec<f64> = self.movements.iter().rev().take(10).map(|m| m.1).collect();
        1.0 - (std_dev(&recent) * 5.0).min(1.0)
    }

    pub fn analyze(&mut self, landmarks: &FaceLandmarks, now: f64) -> StressAnalysis {
        let tension = facial_tension(landmarks);
        let movement = self.micro_movement(landmarks);
        let strain = eye_strain(landmarks);
        let stability = self.stability();

        for (history, value) in [(&mut self.tensions, tension), (&mut self.movements, movement)] {
            if history.len() == HISTORY {
                history.pop_front();
            }
            history.push_back((now, value));
            while history.front().is_some_and(|(t, _)| now - t > TIME_WINDOW) {
                history.pop_front();
            }
        }
        self.previous = Some(landmarks.clone());

        let score = 0.35 * tension + 0.25 * movement + 0.20 * strain + 0.20 * (1.0 - stability);
        self.level = pct(score);
        let category = StressCategory::from_level(self.level);

        StressAnalysis {
            stress_level: self.level,
            category,
            indicators: StressIndicators {
                tension: pct(tension),
                movement: pct(movement),
                stability: pct(stability),
                eye_strain: pct(strain),
            },
            recommendations: category.recommendations(),
        }
    }

    /// Mean tension and movement over the kept history
    pub fn averages(&self) -> (f64, f64) {
        let avg = |h: &VecDeque<(f64, f64)>| {
            if h.is_empty() {
                0.0
            } else {
                h.iter().map(|x| x.1).sum::<f64>() / h.len() as f64
            }
        };
        (avg(&self.tensions), avg(&self.movements))
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.movements.clear();
        self.tensions.clear();
        self.level = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::synthetic_face;

    #[test]
    fn test_still_face_has_no_movement() {
        let mut s = StressAnalyzer::new();
        let face = synthetic_face(0.3, 0.0);
        let mut last = None;
        for i in 0..10 {
            last = Some(s.analyze(&face, i as f64 * 0.2));
        }
        let r = last.unwrap();
        assert_eq!(r.indicators.movement, 0);
        assert_eq!(r.indicators.stability, 100);
        assert_eq!(r.category, StressCategory::from_level(r.stress_level));
    }

    #[test]
    fn test_jitter_raises_stress() {
        let mut still = StressAnalyzer::new();
        let mut shaky = StressAnalyzer::new();
        let face = synthetic_face(0.3, 0.0);
        let mut calm = 0;
        let mut nervous = 0;
        for i in 0..12 {
            calm = still.analyze(&face, i as f64 * 0.2).stress_level;
            let dx = if i % 2 == 0 { 0.0 } else { 3.0 + i as f64 };
            nervous = shaky.analyze(&face.translated(dx, 0.0), i as f64 * 0.2).stress_level;
        }
        assert!(nervous > calm, "{} vs {}", nervous, calm);
        assert!(shaky.averages().1 > 0.0);
    }

    #[test]
    fn test_closed_eyes_strain() {
        let open = eye_strain(&synthetic_face(0.3, 0.0));
        let closed = eye_strain(&synthetic_face(0.05, 0.0));
        assert!(open < 0.01);
        assert!(closed > 0.4);
    }

    #[test]
    fn test_categories() {
        assert_eq!(StressCategory::from_level(29), StressCategory::Low);
        assert_eq!(StressCategory::from_level(60), StressCategory::High);
        assert_eq!(StressCategory::from_level(95), StressCategory::Critical);
        assert_eq!(StressCategory::Critical.recommendations().len(), 3);
    }
}
