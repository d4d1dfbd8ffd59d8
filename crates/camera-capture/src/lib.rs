//! Camera Capture Library for the operator safety monitor
//!
//! Provides webcam capture and the facial geometry every detector shares.
//! Supports:
//! - USB/V4L2 webcams through nokhwa
//! - Still photos (calibration sessions)
//! - 68-point facial landmarks with EAR/MAR/pose helpers

pub mod capture;
pub mod frame;
pub mod landmarks;

pub use capture::WebcamCapture;
pub use frame::VideoFrame;
pub use landmarks::{centroid, FaceLandmarks, FaceRect, LandmarkDetector, Point};
#[cfg(any(test, feature = "test-util"))]
pub use landmarks::synthetic_face;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Camera not initialized")]
    NotInitialized,

    #[error("Landmark detection failed: {0}")]
    Detection(String),
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera index as enumerated by the OS
    pub index: u32,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Mirror frames horizontally
    pub mirror: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            mirror: true,
        }
    }
}

impl CameraConfig {
    /// Reduced resolution for embedded boards
    pub fn low_power() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 15,
            ..Default::default()
        }
    }
}
