//! ONNX model wrappers: face boxes, 68-point landmarks and behavior objects

use crate::behavior::{BoundingBox, ObjectDetection};
use crate::{DmsConfig, DmsError};
use camera_capture::{CameraError, FaceLandmarks, FaceRect, LandmarkDetector, Point, VideoFrame};
use ndarray::{Array4, ArrayViewD, Axis, Ix3};
use ort::{GraphOptimizationLevel, Session};
use tracing::{debug, error, info};

fn load_session(path: &str, what: &str) -> Result<Session, DmsError> {
    info!("Loading {} model from {}", what, path);
    Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| {
            error!("Failed to load {} model: {}", what, e);
            DmsError::ModelLoad(format!("{}: {}", path, e))
        })
}

/// Frame resized to `size`x`size`, as a 1x3xHxW tensor scaled to 0..1
pub fn to_tensor(frame: &VideoFrame, size: u32) -> Array4<f32> {
    let resized = frame.resize(size, size);
    let s = size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, s, s));
    for (i, px) in resized.data.chunks_exact(3).enumerate() {
        let (y, x) = (i / s, i % s);
        for c in 0..3 {
            input[[0, c, y, x]] = px[c] as f32 / 255.0;
        }
    }
    input
}

/// Greedy per-class non-maximum suppression, highest confidence first
pub fn non_max_suppression(mut detections: Vec<ObjectDetection>, iou: f32) -> Vec<ObjectDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<ObjectDetection> = Vec::new();
    for d in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.label == d.label && k.bbox.iou(&d.bbox) > iou as f64);
        if !overlaps {
            kept.push(d);
        }
    }
    kept
}

/// Decode a YOLO head of shape `[1, 4 + classes, anchors]`
/// (centre x, centre y, width, height, then one score per class).
pub fn decode_yolo(
    output: ArrayViewD<'_, f32>,
    labels: &[String],
    min_confidence: f32,
    scale_x: f64,
    scale_y: f64,
) -> Result<Vec<ObjectDetection>, DmsError> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[1] < 5 {
        return Err(DmsError::Inference(format!("unexpected YOLO output shape {:?}", shape)));
    }
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|e| DmsError::Inference(e.to_string()))?;
    let rows = output.index_axis(Axis(0), 0);
    let classes = shape[1] - 4;

    let mut detections = Vec::new();
    for a in 0..shape[2] {
        let (best, score) = (0..classes)
            .map(|c| (c, rows[[4 + c, a]]))
            .fold((0, f32::MIN), |acc, x| if x.1 > acc.1 { x } else { acc });
        if score < min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (rows[[0, a]] as f64, rows[[1, a]] as f64, rows[[2, a]] as f64, rows[[3, a]] as f64);
        detections.push(ObjectDetection {
            label: labels.get(best).cloned().unwrap_or_else(|| format!("class_{}", best)),
            confidence: score,
            bbox: BoundingBox {
                x: (cx - w / 2.0) * scale_x,
                y: (cy - h / 2.0) * scale_y,
                width: w * scale_x,
                height: h * scale_y,
            },
        });
    }
    Ok(detections)
}

/// YOLO-style object detector
pub struct ObjectModel {
    session: Session,
    input_size: u32,
    labels: Vec<String>,
    nms_iou: f32,
}

impl ObjectModel {
    pub fn load(path: &str, input_size: u32, labels: Vec<String>, nms_iou: f32) -> Result<Self, DmsError> {
        Ok(Self {
            session: load_session(path, "object")?,
            input_size,
            labels,
            nms_iou,
        })
    }

    /// Behavior objects from the configured model
    pub fn from_config(config: &DmsConfig) -> Result<Option<Self>, DmsError> {
        config
            .object_model_path
            .as_deref()
            .map(|p| Self::load(p, config.object_input_size, config.object_labels.clone(), config.nms_iou))
            .transpose()
    }

    /// Detections above `min_confidence`, in frame coordinates
    pub fn detect(&self, frame: &VideoFrame, min_confidence: f32) -> Result<Vec<ObjectDetection>, DmsError> {
        let input = to_tensor(frame, self.input_size);
        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| DmsError::Inference(e.to_string()))?)
            .map_err(|e| DmsError::Inference(e.to_string()))?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        let sx = frame.width as f64 / self.input_size as f64;
        let sy = frame.height as f64 / self.input_size as f64;
        let raw = decode_yolo(output, &self.labels, min_confidence, sx, sy)?;
        let kept = non_max_suppression(raw, self.nms_iou);
        debug!("{} objects after NMS", kept.len());
        Ok(kept)
    }
}

/// Face box detector followed by 68-point landmark regression on the crop
pub struct LandmarkModel {
    faces: ObjectModel,
    landmarks: Session,
    input_size: u32,
    min_confidence: f32,
    crop_scale: f64,
}

impl LandmarkModel {
    pub fn from_config(config: &DmsConfig) -> Result<Self, DmsError> {
        let face_path = config
            .face_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("face_model_path not set".into()))?;
        let landmark_path = config
            .landmark_model_path
            .as_deref()
            .ok_or_else(|| DmsError::Config("landmark_model_path not set".into()))?;
        Ok(Self {
            faces: ObjectModel::load(face_path, config.face_input_size, vec!["face".into()], config.nms_iou)?,
            landmarks: load_session(landmark_path, "landmark")?,
            input_size: config.landmark_input_size,
            min_confidence: config.face_confidence,
            crop_scale: config.face_crop_scale,
        })
    }

    /// Largest face in the frame
    pub fn find_face(&self, frame: &VideoFrame) -> Result<Option<FaceRect>, DmsError> {
        let faces = self.faces.detect(frame, self.min_confidence)?;
        Ok(faces
            .into_iter()
            .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
            .map(|f| FaceRect {
                x: f.bbox.x,
                y: f.bbox.y,
                width: f.bbox.width,
                height: f.bbox.height,
                confidence: f.confidence,
            }))
    }

    fn landmarks_for(&self, frame: &VideoFrame, face: FaceRect) -> Result<Option<FaceLandmarks>, DmsError> {
        let region = face.expanded(self.crop_scale);
        let Some(crop) = frame.crop_clamped(
            region.x.round() as i64,
            region.y.round() as i64,
            region.width.round() as i64,
            region.height.round() as i64,
        ) else {
            return Ok(None);
        };
        let (ox, oy) = (region.x.max(0.0).round(), region.y.max(0.0).round());

        let input = to_tensor(&crop, self.input_size);
        let outputs = self
            .landmarks
            .run(ort::inputs![input].map_err(|e| DmsError::Inference(e.to_string()))?)
            .map_err(|e| DmsError::Inference(e.to_string()))?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        // 136 values: x0, y0, x1, y1, ... normalised to the crop
        let values: Vec<f32> = output.iter().copied().collect();
        if values.len() < 136 {
            return Err(DmsError::KeypointsMissing);
        }
        let points = values[..136]
            .chunks_exact(2)
            .map(|xy| {
                Point::new(
                    ox + xy[0] as f64 * crop.width as f64,
                    oy + xy[1] as f64 * crop.height as f64,
                )
            })
            .collect();
        FaceLandmarks::new(points, face)
            .map(Some)
            .map_err(|e| DmsError::ImageProcessing(e.to_string()))
    }
}

impl LandmarkDetector for LandmarkModel {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceLandmarks>, CameraError> {
        let face = self
            .find_face(frame)
            .map_err(|e| CameraError::Detection(e.to_string()))?;
        match face {
            Some(face) => self
                .landmarks_for(frame, face)
                .map_err(|e| CameraError::Detection(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn det(label: &str, confidence: f32, x: f64) -> ObjectDetection {
        ObjectDetection {
            label: label.into(),
            confidence,
            bbox: BoundingBox { x, y: 0.0, width: 10.0, height: 10.0 },
        }
    }

    #[test]
    fn test_nms_keeps_best_per_class() {
        let kept = non_max_suppression(
            vec![
                det("cell phone", 0.6, 1.0),
                det("cell phone", 0.9, 0.0),
                det("cigarette", 0.5, 0.0),
                det("cell phone", 0.7, 50.0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().all(|d| d.confidence != 0.6));
    }

    #[test]
    fn test_decode_yolo() {
        // two classes, three anchors
        let mut out = Array3::<f32>::zeros((1, 6, 3));
        let anchors = [
            [100.0, 100.0, 20.0, 40.0, 0.9, 0.1],
            [200.0, 50.0, 10.0, 10.0, 0.2, 0.3],
            [300.0, 300.0, 30.0, 30.0, 0.1, 0.8],
        ];
        for (a, row) in anchors.iter().enumerate() {
            for (k, v) in row.iter().enumerate() {
                out[[0, k, a]] = *v;
            }
        }
        let labels = vec!["cell phone".to_string(), "cigarette".to_string()];
        let found = decode_yolo(out.view().into_dyn(), &labels, 0.5, 2.0, 1.0).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].label, "cell phone");
        assert_eq!(found[0].bbox, BoundingBox { x: 180.0, y: 80.0, width: 40.0, height: 40.0 });
        assert_eq!(found[1].label, "cigarette");
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let out = Array3::<f32>::zeros((1, 3, 3));
        assert!(decode_yolo(out.view().into_dyn(), &[], 0.5, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_tensor_layout() {
        let frame = VideoFrame::filled(8, 8, [255, 0, 51], 0);
        let t = to_tensor(&frame, 4);
        assert_eq!(t.shape(), &[1, 3, 4, 4]);
        assert_eq!(t[[0, 0, 2, 3]], 1.0);
        assert_eq!(t[[0, 1, 0, 0]], 0.0);
        assert!((t[[0, 2, 1, 1]] - 0.2).abs() < 1e-6);
    }
}
