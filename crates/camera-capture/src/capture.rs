//! Webcam capture via nokhwa

use crate::{CameraConfig, CameraError, VideoFrame};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::time::Instant;
use tracing::{debug, error, info};

/// Live webcam producing RGB `VideoFrame`s
pub struct WebcamCapture {
    camera: Camera,
    config: CameraConfig,
    started: Instant,
    sequence: u32,
}

impl WebcamCapture {
    /// Open the camera and start streaming
    pub fn open(config: CameraConfig) -> Result<Self, CameraError> {
        info!(
            "Opening webcam {} ({}x{} @ {} fps requested)",
            config.index, config.width, config.height, config.fps
        );
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(config.index), requested)
            .map_err(|e| CameraError::Open(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CameraError::Stream(e.to_string()))?;

        Ok(Self {
            camera,
            config,
            started: Instant::now(),
            sequence: 0,
        })
    }

    /// Grab and decode the next frame
    pub fn next_frame(&mut self) -> Result<VideoFrame, CameraError> {
        let buffer = self.camera.frame().map_err(|e| {
            error!("Camera frame capture failed: {}", e);
            CameraError::Stream(e.to_string())
        })?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::Format(e.to_string()))?;

        let timestamp_ns = self.started.elapsed().as_nanos() as u64;
        let (width, height) = (decoded.width(), decoded.height());
        let mut frame =
            VideoFrame::new(decoded.into_raw(), width, height, timestamp_ns, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);

        if (frame.width, frame.height) != (self.config.width, self.config.height) {
            frame = frame.resize(self.config.width, self.config.height);
        }
        if self.config.mirror {
            frame.flip_horizontal();
        }
        debug!("Captured frame #{} {}x{}", frame.sequence, frame.width, frame.height);
        Ok(frame)
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            error!("Failed to stop camera stream: {}", e);
        }
    }
}
