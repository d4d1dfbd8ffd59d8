//! DMS configuration

use serde::{Deserialize, Serialize};

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Face box model (YOLO-style, single class)
    pub face_model_path: Option<String>,
    /// 68-point landmark regression model
    pub landmark_model_path: Option<String>,
    /// Phone / cigarette detector (YOLO-style)
    pub object_model_path: Option<String>,

    /// Square input sizes of each model
    pub face_input_size: u32,
    pub landmark_input_size: u32,
    pub object_input_size: u32,

    /// Face detection confidence threshold
    pub face_confidence: f32,
    /// IoU above which overlapping boxes are suppressed
    pub nms_iou: f32,
    /// Face box growth before cropping for landmarks
    pub face_crop_scale: f64,
    /// Class names of the object model, in output order
    pub object_labels: Vec<String>,

    /// Minimum gap between two reports of the same event (seconds)
    pub report_cooldown_secs: f64,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            face_model_path: None,
            landmark_model_path: None,
            object_model_path: None,
            face_input_size: 320,
            landmark_input_size: 112,
            object_input_size: 640,
            face_confidence: 0.5,
            nms_iou: 0.45,
            face_crop_scale: 1.2,
            object_labels: vec!["cell phone".to_string(), "cigarette".to_string()],
            report_cooldown_secs: 30.0,
        }
    }
}

impl DmsConfig {
    /// Configuration with every model under `dir` using the default file names
    pub fn with_model_dir(dir: &str) -> Self {
        let path = |name: &str| Some(format!("{}/{}", dir.trim_end_matches('/'), name));
        Self {
            face_model_path: path("face_detector.onnx"),
            landmark_model_path: path("face_landmarks_68.onnx"),
            object_model_path: path("behavior_yolo.onnx"),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dir_paths() {
        let config = DmsConfig::with_model_dir("assets/models/");
        assert_eq!(config.landmark_model_path.as_deref(), Some("assets/models/face_landmarks_68.onnx"));
        assert_eq!(config.object_labels.len(), 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DmsConfig = serde_json::from_str(r#"{"nms_iou": 0.5}"#).unwrap();
        assert_eq!(config.nms_iou, 0.5);
        assert_eq!(config.object_input_size, 640);
    }
}
