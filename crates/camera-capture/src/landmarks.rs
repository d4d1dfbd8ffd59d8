//! 68-point facial landmarks and the geometry derived from them
//!
//! Point layout follows the iBUG 300-W annotation used by dlib:
//! jaw 0-16, eyebrows 17-26, nose 27-35, eyes 36-47, mouth 48-67.

use crate::{CameraError, VideoFrame};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Number of points in a landmark set
pub const LANDMARK_COUNT: usize = 68;

pub const JAW: Range<usize> = 0..17;
pub const LEFT_EYEBROW: Range<usize> = 17..22;
pub const RIGHT_EYEBROW: Range<usize> = 22..27;
pub const NOSE_BRIDGE: Range<usize> = 27..31;
pub const NOSE_TIP: Range<usize> = 31..36;
pub const LEFT_EYE: Range<usize> = 36..42;
pub const RIGHT_EYE: Range<usize> = 42..48;
pub const MOUTH: Range<usize> = 48..68;
pub const TOP_LIP: Range<usize> = 48..55;
pub const BOTTOM_LIP: Range<usize> = 54..60;

pub const NOSE: usize = 30;
pub const CHIN: usize = 8;
pub const LEFT_EYE_OUTER: usize = 36;
pub const RIGHT_EYE_OUTER: usize = 45;

/// 2D image point (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Centroid of a set of points. Empty input gives the origin.
pub fn centroid(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point::default();
    }
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// Face bounding box
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f32,
}

impl FaceRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Rectangle grown around its centre by `factor`
    pub fn expanded(&self, factor: f64) -> FaceRect {
        let c = self.center();
        let w = self.width * factor;
        let h = self.height * factor;
        FaceRect {
            x: c.x - w / 2.0,
            y: c.y - h / 2.0,
            width: w,
            height: h,
            confidence: self.confidence,
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }
}

/// Eye aspect ratio over the six eye contour points
pub fn eye_aspect_ratio(eye: &[Point]) -> f64 {
    if eye.len() < 6 {
        return 0.0;
    }
    let a = eye[1].distance(&eye[5]);
    let b = eye[2].distance(&eye[4]);
    let c = eye[0].distance(&eye[3]);
    if c > 0.0 {
        (a + b) / (2.0 * c)
    } else {
        0.0
    }
}

/// One detected face: exactly 68 points plus its bounding box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLandmarks")]
pub struct FaceLandmarks {
    points: Vec<Point>,
    pub rect: FaceRect,
}

/// Serialized form, checked by [`FaceLandmarks::new`] on the way in
#[derive(Deserialize)]
struct RawLandmarks {
    points: Vec<Point>,
    rect: FaceRect,
}

impl TryFrom<RawLandmarks> for FaceLandmarks {
    type Error = CameraError;

    fn try_from(raw: RawLandmarks) -> Result<Self, Self::Error> {
        FaceLandmarks::new(raw.points, raw.rect)
    }
}

impl FaceLandmarks {
    pub fn new(points: Vec<Point>, rect: FaceRect) -> Result<Self, CameraError> {
        if points.len() != LANDMARK_COUNT {
            return Err(CameraError::Format(format!(
                "expected {} landmarks, got {}",
                LANDMARK_COUNT,
                points.len()
            )));
        }
        Ok(Self { points, rect })
    }

    /// Build from points alone, using their bounding box as the face rect
    pub fn from_points(points: Vec<Point>) -> Result<Self, CameraError> {
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
        for p in &points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let rect = FaceRect {
            x: min_x,
            y: min_y,
            width: (max_x - min_x).max(0.0),
            height: (max_y - min_y).max(0.0),
            confidence: 1.0,
        };
        Self::new(points, rect)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Point {
        self.points[index]
    }

    pub fn jaw(&self) -> &[Point] {
        &self.points[JAW]
    }

    pub fn left_eyebrow(&self) -> &[Point] {
        &self.points[LEFT_EYEBROW]
    }

    pub fn right_eyebrow(&self) -> &[Point] {
        &self.points[RIGHT_EYEBROW]
    }

    pub fn nose_bridge(&self) -> &[Point] {
        &self.points[NOSE_BRIDGE]
    }

    pub fn nose_tip(&self) -> &[Point] {
        &self.points[NOSE_TIP]
    }

    pub fn left_eye(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    pub fn right_eye(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }

    pub fn mouth(&self) -> &[Point] {
        &self.points[MOUTH]
    }

    pub fn top_lip(&self) -> &[Point] {
        &self.points[TOP_LIP]
    }

    pub fn bottom_lip(&self) -> &[Point] {
        &self.points[BOTTOM_LIP]
    }

    pub fn left_ear(&self) -> f64 {
        eye_aspect_ratio(self.left_eye())
    }

    pub fn right_ear(&self) -> f64 {
        eye_aspect_ratio(self.right_eye())
    }

    pub fn average_ear(&self) -> f64 {
        (self.left_ear() + self.right_ear()) / 2.0
    }

    pub fn left_eye_center(&self) -> Point {
        centroid(self.left_eye())
    }

    pub fn right_eye_center(&self) -> Point {
        centroid(self.right_eye())
    }

    /// Mean of three vertical lip openings over mouth width
    pub fn mouth_aspect_ratio(&self) -> f64 {
        let m = self.mouth();
        let a = m[2].distance(&m[10]);
        let b = m[4].distance(&m[8]);
        let c = m[3].distance(&m[9]);
        let d = m[0].distance(&m[6]);
        if d > 0.0 {
            (a + b + c) / (3.0 * d)
        } else {
            0.0
        }
    }

    pub fn mouth_width(&self) -> f64 {
        let m = self.mouth();
        m[0].distance(&m[6])
    }

    pub fn mouth_height(&self) -> f64 {
        let m = self.mouth();
        m[3].distance(&m[9])
    }

    /// Angle (degrees) between the nose-to-chin vector and the image vertical
    pub fn head_tilt_degrees(&self) -> f64 {
        let nose = self.point(NOSE);
        let chin = self.point(CHIN);
        let (dx, dy) = (chin.x - nose.x, chin.y - nose.y);
        let norm = (dx * dx + dy * dy).sqrt();
        if norm == 0.0 {
            return 0.0;
        }
        (dy / norm).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Ratio of outer-eye-corner distances to the nose tip (yaw proxy)
    pub fn head_rotation_ratio(&self) -> f64 {
        let nose = self.point(NOSE);
        let left = self.point(LEFT_EYE_OUTER).distance(&nose);
        let right = self.point(RIGHT_EYE_OUTER).distance(&nose);
        if right > 0.0 {
            left / right
        } else {
            1.0
        }
    }

    pub fn eye_distance(&self) -> f64 {
        self.point(LEFT_EYE_OUTER).distance(&self.point(RIGHT_EYE_OUTER))
    }

    pub fn nose_to_mouth(&self) -> f64 {
        self.point(NOSE).distance(&self.mouth()[3])
    }

    /// Mean distance between left eyebrow points and the matching eye points
    pub fn eyebrow_distance(&self) -> f64 {
        let brow = self.left_eyebrow();
        let eye = self.left_eye();
        let n = brow.len().min(eye.len());
        (0..n).map(|i| brow[i].distance(&eye[i])).sum::<f64>() / n as f64
    }

    /// Horizontal extent of the jaw line
    pub fn jaw_width(&self) -> f64 {
        let jaw = self.jaw();
        jaw[0].distance(&jaw[jaw.len() - 1])
    }

    /// Landmarks shifted by an offset (crop coordinates back to frame)
    pub fn translated(&self, dx: f64, dy: f64) -> FaceLandmarks {
        FaceLandmarks {
            points: self.points.iter().map(|p| Point::new(p.x + dx, p.y + dy)).collect(),
            rect: FaceRect {
                x: self.rect.x + dx,
                y: self.rect.y + dy,
                ..self.rect
            },
        }
    }
}

/// Source of facial landmarks for a frame (first face only)
pub trait LandmarkDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceLandmarks>, CameraError>;
}

/// Synthetic frontal face used by tests across the workspace.
///
/// Eye openness and mouth opening are adjustable; everything else is a
/// symmetric, upright face about 200 px wide centred at (320, 240).
#[cfg(any(test, feature = "test-util"))]
pub fn synthetic_face(eye_open: f64, mouth_open: f64) -> FaceLandmarks {
    let mut pts = vec![Point::default(); LANDMARK_COUNT];
    let (cx, cy) = (320.0, 240.0);

    // jaw: U shape from (220,200) down to the chin at (320,300) and back up
    for (i, p) in pts.iter_mut().enumerate().take(17) {
        let t = i as f64 / 16.0;
        let angle = std::f64::consts::PI * t;
        *p = Point::new(cx - 100.0 * angle.cos(), cy - 40.0 + 100.0 * angle.sin());
    }
    // eyebrows
    for i in 0..5 {
        pts[17 + i] = Point::new(cx - 70.0 + i as f64 * 12.0, cy - 60.0);
        pts[22 + i] = Point::new(cx + 22.0 + i as f64 * 12.0, cy - 60.0);
    }
    // nose bridge and tip
    for i in 0..4 {
        pts[27 + i] = Point::new(cx, cy - 40.0 + i as f64 * 12.0);
    }
    pts[NOSE] = Point::new(cx, cy);
    for i in 0..5 {
        pts[31 + i] = Point::new(cx - 16.0 + i as f64 * 8.0, cy + 8.0);
    }
    // eyes: width 30, vertical half-opening = eye_open * 15
    let eye = |x0: f64| {
        let h = eye_open * 15.0;
        [
            Point::new(x0, cy - 40.0),
            Point::new(x0 + 10.0, cy - 40.0 - h),
            Point::new(x0 + 20.0, cy - 40.0 - h),
            Point::new(x0 + 30.0, cy - 40.0),
            Point::new(x0 + 20.0, cy - 40.0 + h),
            Point::new(x0 + 10.0, cy - 40.0 + h),
        ]
    };
    pts[36..42].copy_from_slice(&eye(cx - 70.0));
    pts[42..48].copy_from_slice(&eye(cx + 40.0));

    // mouth: outer 48-59, inner 60-67; width 60, opening mouth_open * 60
    let my = cy + 40.0;
    let half = mouth_open * 30.0;
    let outer = [
        (-30.0, 0.0),
        (-20.0, -5.0 - half),
        (-10.0, -7.0 - half),
        (0.0, -6.0 - half),
        (10.0, -7.0 - half),
        (20.0, -5.0 - half),
        (30.0, 0.0),
        (20.0, 5.0 + half),
        (10.0, 7.0 + half),
        (0.0, 8.0 + half),
        (-10.0, 7.0 + half),
        (-20.0, 5.0 + half),
    ];
    for (i, (dx, dy)) in outer.iter().enumerate() {
        pts[48 + i] = Point::new(cx + dx, my + dy);
    }
    let inner = [
        (-24.0, 0.0),
        (-10.0, -2.0 - half),
        (0.0, -2.0 - half),
        (10.0, -2.0 - half),
        (24.0, 0.0),
        (10.0, 2.0 + half),
        (0.0, 2.0 + half),
        (-10.0, 2.0 + half),
    ];
    for (i, (dx, dy)) in inner.iter().enumerate() {
        pts[60 + i] = Point::new(cx + dx, my + dy);
    }

    let rect = FaceRect {
        x: cx - 100.0,
        y: cy - 70.0,
        width: 200.0,
        height: 170.0,
        confidence: 1.0,
    };
    FaceLandmarks { points: pts, rect }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_point_count() {
        assert!(FaceLandmarks::from_points(vec![Point::default(); 10]).is_err());
        assert!(FaceLandmarks::from_points(vec![Point::default(); 68]).is_ok());
    }

    #[test]
    fn test_deserialize_checks_point_count() {
        let face = synthetic_face(0.3, 0.0);
        let json = serde_json::to_string(&face).unwrap();
        let back: FaceLandmarks = serde_json::from_str(&json).unwrap();
        assert_eq!(back, face);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["points"].as_array_mut().unwrap().truncate(10);
        let err = serde_json::from_value::<FaceLandmarks>(value).unwrap_err();
        assert!(err.to_string().contains("expected 68 landmarks, got 10"));
    }

    #[test]
    fn test_ear_tracks_eye_opening() {
        let open = synthetic_face(1.0, 0.0);
        let closed = synthetic_face(0.1, 0.0);
        // (2 * 30) / (2 * 30) = 1.0 for a fully open synthetic eye
        assert!((open.average_ear() - 1.0).abs() < 1e-9);
        assert!(closed.average_ear() < 0.15);
        assert!((open.left_ear() - open.right_ear()).abs() < 1e-9);
    }

    #[test]
    fn test_ear_zero_width() {
        let eye = [Point::new(1.0, 1.0); 6];
        assert_eq!(eye_aspect_ratio(&eye), 0.0);
    }

    #[test]
    fn test_mar_grows_with_mouth_opening() {
        let closed = synthetic_face(0.3, 0.0);
        let open = synthetic_face(0.3, 1.0);
        assert!(open.mouth_aspect_ratio() > closed.mouth_aspect_ratio() * 3.0);
        assert!((closed.mouth_width() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_frontal_pose() {
        let face = synthetic_face(0.3, 0.0);
        assert!(face.head_tilt_degrees().abs() < 1e-6);
        assert!((face.head_rotation_ratio() - 1.0).abs() < 1e-9);
        assert!((face.eye_distance() - 140.0).abs() < 1e-9);
    }

    proptest::proptest! {
        #[test]
        fn test_ear_matches_synthetic_opening(open in 0.01f64..2.0) {
            let face = synthetic_face(open, 0.0);
            proptest::prop_assert!((face.average_ear() - open).abs() < 1e-9);
        }

        #[test]
        fn test_translation_preserves_geometry(dx in -200.0f64..200.0, dy in -200.0f64..200.0) {
            let face = synthetic_face(0.3, 0.4);
            let moved = face.translated(dx, dy);
            proptest::prop_assert!((face.mouth_aspect_ratio() - moved.mouth_aspect_ratio()).abs() < 1e-9);
            proptest::prop_assert!((face.eye_distance() - moved.eye_distance()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rect_expand_contains() {
        let rect = FaceRect { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let big = rect.expanded(2.0);
        assert_eq!(big.x, -5.0);
        assert!(big.contains(&Point::new(14.0, 14.0)));
        assert!(!rect.contains(&Point::new(14.0, 14.0)));
    }
}
