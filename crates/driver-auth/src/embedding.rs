//! Face crop to embedding via an ONNX recognition model

use crate::{AuthConfig, AuthError, FaceEmbedding};
use camera_capture::{FaceRect, VideoFrame};
use ndarray::Array4;
use ort::{GraphOptimizationLevel, Session};
use tracing::{error, info};

/// Face box growth before cropping
const CROP_MARGIN: f64 = 1.1;

/// Crop resized to `size`x`size`, as a 1x3xHxW tensor centred on zero
pub fn face_tensor(crop: &VideoFrame, size: u32) -> Array4<f32> {
    let resized = crop.resize(size, size);
    let s = size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, s, s));
    for (i, px) in resized.data.chunks_exact(3).enumerate() {
        let (y, x) = (i / s, i % s);
        for c in 0..3 {
            input[[0, c, y, x]] = (px[c] as f32 - 127.5) / 128.0;
        }
    }
    input
}

pub struct EmbeddingModel {
    session: Session,
    input_size: u32,
}

impl EmbeddingModel {
    pub fn load(path: &str, input_size: u32) -> Result<Self, AuthError> {
        info!("Loading face embedding model from {}", path);
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| {
                error!("Failed to load embedding model: {}", e);
                AuthError::EmbeddingFailed(format!("{}: {}", path, e))
            })?;
        Ok(Self { session, input_size })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>, AuthError> {
        config
            .embedding_model_path
            .as_deref()
            .map(|p| Self::load(p, config.embedding_input_size))
            .transpose()
    }

    /// Embedding of the face inside `face`; quality is the detector confidence
    pub fn embed(&self, frame: &VideoFrame, face: &FaceRect) -> Result<FaceEmbedding, AuthError> {
        let region = face.expanded(CROP_MARGIN);
        let crop = frame
            .crop_clamped(
                region.x.round() as i64,
                region.y.round() as i64,
                region.width.round() as i64,
                region.height.round() as i64,
            )
            .ok_or(AuthError::NoFace)?;

        let input = face_tensor(&crop, self.input_size);
        let outputs = self
            .session
            .run(ort::inputs![input].map_err(|e| AuthError::EmbeddingFailed(e.to_string()))?)
            .map_err(|e| AuthError::EmbeddingFailed(e.to_string()))?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AuthError::EmbeddingFailed(e.to_string()))?;

        FaceEmbedding::new(output.iter().copied().collect(), face.confidence)
    }
}
