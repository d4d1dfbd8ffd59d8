//! Operator Identification Module
//!
//! Face recognition-based operator identification:
//! - Face embedding extraction (ONNX)
//! - Operator registry persisted as JSON
//! - Distance matching with night-time tolerance
//! - Welcome / unregistered audio and unknown-operator escalation

pub mod config;
pub mod embedding;
pub mod recognizer;
pub mod registry;
pub mod session;

pub use config::AuthConfig;
pub use embedding::EmbeddingModel;
pub use recognizer::{FaceRecognizer, Identity, RecognizerStatus};
pub use registry::{Operator, OperatorRegistry};
pub use session::{
    CurrentOperator, OperatorSession, SessionStats, SessionUpdate, UnknownOperatorReport, UNKNOWN_OPERATOR_EVENT,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Face not detected")]
    NoFace,

    #[error("Embedding extraction failed: {0}")]
    EmbeddingFailed(String),

    #[error("Operator not enrolled: {0}")]
    NotEnrolled(String),

    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Embedding length produced by the recognition model
pub const EMBEDDING_DIM: usize = 128;

/// Face embedding (128-dim, L2-normalised)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub vector: Vec<f32>,
    pub quality: f32,
}

impl FaceEmbedding {
    /// Build a normalised embedding; rejects wrong lengths and zero vectors
    pub fn new(vector: Vec<f32>, quality: f32) -> Result<Self, AuthError> {
        if vector.len() != EMBEDDING_DIM {
            return Err(AuthError::InvalidEmbedding(format!(
                "expected {} values, got {}",
                EMBEDDING_DIM,
                vector.len()
            )));
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(AuthError::InvalidEmbedding("zero or non-finite norm".into()));
        }
        Ok(Self {
            vector: vector.into_iter().map(|x| x / norm).collect(),
            quality,
        })
    }

    /// Euclidean distance to another embedding
    pub fn distance(&self, other: &FaceEmbedding) -> f64 {
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| {
                let d = (*a - *b) as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Unit embedding along axis `i`, optionally blended toward axis `j`
    pub(crate) fn axis(i: usize, j: usize, mix: f32) -> FaceEmbedding {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[i] = 1.0 - mix;
        v[j] += mix;
        FaceEmbedding::new(v, 1.0).unwrap()
    }

    pub(crate) fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("driver-auth-{}-{}", tag, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_embedding_is_normalised() {
        let e = FaceEmbedding::new(vec![2.0; EMBEDDING_DIM], 0.9).unwrap();
        let norm: f32 = e.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embedding_rejects_bad_input() {
        assert!(FaceEmbedding::new(vec![1.0; 3], 1.0).is_err());
        assert!(FaceEmbedding::new(vec![0.0; EMBEDDING_DIM], 1.0).is_err());
    }

    #[test]
    fn test_distance() {
        let a = axis(0, 0, 0.0);
        let b = axis(1, 1, 0.0);
        assert_eq!(a.distance(&a), 0.0);
        assert!((a.distance(&b) - 2f64.sqrt()).abs() < 1e-6);
    }

    proptest::proptest! {
        #[test]
        fn test_distance_is_symmetric(v in proptest::collection::vec(0.01f32..1.0, EMBEDDING_DIM),
                                      w in proptest::collection::vec(0.01f32..1.0, EMBEDDING_DIM)) {
            let a = FaceEmbedding::new(v, 1.0).unwrap();
            let b = FaceEmbedding::new(w, 1.0).unwrap();
            proptest::prop_assert!((a.distance(&b) - b.distance(&a)).abs() < 1e-9);
            proptest::prop_assert!(a.distance(&b) <= 2.0 + 1e-6);
        }
    }
}
