//! Per-photo facial measurements

use camera_capture::{FaceLandmarks, Point};
use serde::{Deserialize, Serialize};

/// Every measurement taken from one calibration photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetrics {
    pub face_width: f64,
    pub face_height: f64,
    pub face_area: f64,
    pub left_ear: f64,
    pub right_ear: f64,
    pub avg_ear: f64,
    pub mar: f64,
    pub mouth_width: f64,
    pub mouth_height: f64,
    /// Degrees from vertical
    pub head_tilt: f64,
    pub head_rotation: f64,
    pub eye_distance: f64,
    pub nose_to_mouth: f64,
    pub eyebrow_distance: f64,
    /// Mean grayscale level of the whole photo
    pub light_level: f64,
    pub landmarks: Vec<Point>,
}

impl PhotoMetrics {
    pub fn extract(face: &FaceLandmarks, light_level: f64) -> Self {
        let left_ear = face.left_ear();
        let right_ear = face.right_ear();
        Self {
            face_width: face.rect.width,
            face_height: face.rect.height,
            face_area: face.rect.area(),
            left_ear,
            right_ear,
            avg_ear: (left_ear + right_ear) / 2.0,
            mar: face.mouth_aspect_ratio(),
            mouth_width: face.mouth_width(),
            mouth_height: face.mouth_height(),
            head_tilt: face.head_tilt_degrees(),
            head_rotation: face.head_rotation_ratio(),
            eye_distance: face.eye_distance(),
            nose_to_mouth: face.nose_to_mouth(),
            eyebrow_distance: face.eyebrow_distance(),
            light_level,
            landmarks: face.points().to_vec(),
        }
    }

    /// Named scalar fields, in a stable order
    pub fn scalars(&self) -> [(&'static str, f64); 15] {
        [
            ("face_width", self.face_width),
            ("face_height", self.face_height),
            ("face_area", self.face_area),
            ("left_ear", self.left_ear),
            ("right_ear", self.right_ear),
            ("avg_ear", self.avg_ear),
            ("mar", self.mar),
            ("mouth_width", self.mouth_width),
            ("mouth_height", self.mouth_height),
            ("head_tilt", self.head_tilt),
            ("head_rotation", self.head_rotation),
            ("eye_distance", self.eye_distance),
            ("nose_to_mouth", self.nose_to_mouth),
            ("eyebrow_distance", self.eyebrow_distance),
            ("light_level", self.light_level),
        ]
    }
}

/// Pull one field out of every photo
pub fn series(metrics: &[PhotoMetrics], field: impl Fn(&PhotoMetrics) -> f64) -> Vec<f64> {
    metrics.iter().map(field).collect()
}

/// Mean absolute landmark displacement between consecutive photos, scaled by 1/100
pub fn landmark_drift(metrics: &[PhotoMetrics]) -> Vec<f64> {
    metrics
        .windows(2)
        .filter(|w| !w[0].landmarks.is_empty() && w[0].landmarks.len() == w[1].landmarks.len())
        .map(|w| {
            let total: f64 = w[0]
                .landmarks
                .iter()
                .zip(&w[1].landmarks)
                .map(|(a, b)| (a.x - b.x).abs() + (a.y - b.y).abs())
                .sum();
            // mean over both coordinates of every point
            total / (2 * w[0].landmarks.len()) as f64 / 100.0
        })
        .collect()
}

/// Per-point mean of the landmark sets
pub fn reference_landmarks(metrics: &[PhotoMetrics]) -> Vec<Point> {
    let Some(first) = metrics.first() else {
        return Vec::new();
    };
    let n = first.landmarks.len();
    let usable: Vec<&PhotoMetrics> = metrics.iter().filter(|m| m.landmarks.len() == n).collect();
    let count = usable.len() as f64;
    (0..n)
        .map(|i| {
            let (sx, sy) = usable
                .iter()
                .fold((0.0, 0.0), |(sx, sy), m| (sx + m.landmarks[i].x, sy + m.landmarks[i].y));
            Point::new(sx / count, sy / count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::landmarks::synthetic_face;

    #[test]
    fn test_extract_from_frontal_face() {
        let m = PhotoMetrics::extract(&synthetic_face(0.3, 0.0), 120.0);
        assert!((m.avg_ear - 0.3).abs() < 1e-9);
        assert!((m.head_rotation - 1.0).abs() < 1e-9);
        assert_eq!(m.face_area, 200.0 * 170.0);
        assert_eq!(m.landmarks.len(), 68);
        assert_eq!(m.light_level, 120.0);
    }

    #[test]
    fn test_landmark_drift() {
        let a = PhotoMetrics::extract(&synthetic_face(0.3, 0.0), 100.0);
        let b = PhotoMetrics::extract(&synthetic_face(0.3, 0.0).translated(10.0, 0.0), 100.0);
        let drift = landmark_drift(&[a.clone(), b]);
        // every x moves 10 px, y does not: mean over coordinates = 5 px
        assert_eq!(drift.len(), 1);
        assert!((drift[0] - 0.05).abs() < 1e-9);
        assert!(landmark_drift(&[a]).is_empty());
    }

    #[test]
    fn test_reference_landmarks_average() {
        let a = PhotoMetrics::extract(&synthetic_face(0.3, 0.0), 100.0);
        let b = PhotoMetrics::extract(&synthetic_face(0.3, 0.0).translated(0.0, 10.0), 100.0);
        let reference = reference_landmarks(&[a.clone(), b]);
        assert!((reference[30].y - (a.landmarks[30].y + 5.0)).abs() < 1e-9);
        assert!(reference_landmarks(&[]).is_empty());
    }
}
