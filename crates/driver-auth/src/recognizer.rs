//! Embedding matching against the registry

use crate::{FaceEmbedding, OperatorRegistry};
use calibration::FaceRecognitionThresholds;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Display name used for faces that match nobody
pub const UNKNOWN_NAME: &str = "No Registrado";

/// Identification outcome for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Identity {
    Recognized {
        operator_id: String,
        name: String,
        confidence: f64,
        distance: f64,
    },
    /// Face seen but not matched; `best_distance` is `None` for an empty registry
    Unknown { best_distance: Option<f64> },
}

impl Identity {
    pub fn is_registered(&self) -> bool {
        matches!(self, Identity::Recognized { .. })
    }

    pub fn operator_id(&self) -> Option<&str> {
        match self {
            Identity::Recognized { operator_id, .. } => Some(operator_id),
            Identity::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognizerStatus {
    pub operators_loaded: usize,
    pub is_night_mode: bool,
    pub light_level: f64,
    pub current_tolerance: f64,
}

/// Nearest-neighbour face recognizer
#[derive(Debug, Clone)]
pub struct FaceRecognizer {
    thresholds: FaceRecognitionThresholds,
    night: bool,
    light_level: f64,
}

impl FaceRecognizer {
    pub fn new(thresholds: FaceRecognitionThresholds) -> Self {
        Self {
            thresholds,
            night: false,
            light_level: 0.0,
        }
    }

    pub fn set_thresholds(&mut self, thresholds: FaceRecognitionThresholds) {
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &FaceRecognitionThresholds {
        &self.thresholds
    }

    fn update_lighting(&mut self, light_level: f64) {
        self.light_level = light_level;
        let night = self.thresholds.enable_night_mode && light_level < self.thresholds.night_mode_threshold;
        if night != self.night {
            info!(
                "Face recognition switching to {} mode (light level {:.1})",
                if night { "night" } else { "day" },
                light_level
            );
        }
        self.night = night;
    }

    /// Match tolerance for the current lighting
    pub fn current_tolerance(&self) -> f64 {
        if self.night {
            self.thresholds.face_tolerance + self.thresholds.night_tolerance_adjustment
        } else {
            self.thresholds.face_tolerance
        }
    }

    pub fn identify(&mut self, registry: &OperatorRegistry, embedding: &FaceEmbedding, light_level: f64) -> Identity {
        self.update_lighting(light_level);
        let tolerance = self.current_tolerance();

        let best = registry
            .operators()
            .iter()
            .flat_map(|op| op.embeddings.iter().map(move |e| (op, embedding.distance(e))))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let Some((operator, distance)) = best else {
            return Identity::Unknown { best_distance: None };
        };
        let confidence = 1.0 - distance;
        debug!(
            "Best match {} at distance {:.3} (tolerance {:.2})",
            operator.id, distance, tolerance
        );

        if distance <= tolerance && confidence >= self.thresholds.min_confidence {
            Identity::Recognized {
                operator_id: operator.id.clone(),
                name: operator.name.clone(),
                confidence,
                distance,
            }
        } else {
            Identity::Unknown {
                best_distance: Some(distance),
            }
        }
    }

    pub fn status(&self, registry: &OperatorRegistry) -> RecognizerStatus {
        RecognizerStatus {
            operators_loaded: registry.len(),
            is_night_mode: self.night,
            light_level: self.light_level,
            current_tolerance: self.current_tolerance(),
        }
    }
}
