//! Video frame types and processing

use crate::CameraError;
use image::{ImageBuffer, Rgb, RgbImage};
use std::path::Path;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Uniformly filled frame. Mostly useful for tests and lighting checks.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], timestamp_ns: u64) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self::new(data, width, height, timestamp_ns, 0)
    }

    /// Load a still photo (JPEG/PNG) as a frame with timestamp 0
    pub fn from_image_path(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let img = image::open(path)
            .map_err(|e| CameraError::Format(format!("{}: {}", path.display(), e)))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self::new(rgb.into_raw(), width, height, 0, 0))
    }

    /// Wrap an `image` buffer
    pub fn from_rgb_image(img: RgbImage, timestamp_ns: u64, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, timestamp_ns, sequence)
    }

    /// Copy into an `image` buffer for drawing or encoding
    pub fn to_rgb_image(&self) -> Result<RgbImage, CameraError> {
        ImageBuffer::<Rgb<u8>, _>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| CameraError::Format("buffer size does not match dimensions".into()))
    }

    /// Timestamp in seconds
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ns as f64 / 1e9
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|pixel| luma(pixel[0], pixel[1], pixel[2]))
            .collect()
    }

    /// Mean luma over the whole frame (0..255). Empty frames read as 0.
    pub fn mean_brightness(&self) -> f64 {
        let gray = self.to_grayscale();
        if gray.is_empty() {
            return 0.0;
        }
        gray.iter().map(|&v| v as f64).sum::<f64>() / gray.len() as f64
    }

    /// Crop a region of the frame
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<VideoFrame> {
        if w == 0 || h == 0 || x + w > self.width || y + h > self.height {
            return None;
        }

        let mut cropped = Vec::with_capacity((w * h * 3) as usize);
        for row in y..(y + h) {
            let start = ((row * self.width + x) * 3) as usize;
            let end = start + (w * 3) as usize;
            cropped.extend_from_slice(self.data.get(start..end)?);
        }

        Some(VideoFrame {
            data: cropped,
            width: w,
            height: h,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })
    }

    /// Crop clamped to the frame bounds. Returns `None` if nothing remains.
    pub fn crop_clamped(&self, x: i64, y: i64, w: i64, h: i64) -> Option<VideoFrame> {
        let x0 = x.clamp(0, self.width as i64);
        let y0 = y.clamp(0, self.height as i64);
        let x1 = (x + w).clamp(0, self.width as i64);
        let y1 = (y + h).clamp(0, self.height as i64);
        self.crop(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
    }

    /// Mean RGB of a region, clamped to the frame
    pub fn region_mean(&self, x: i64, y: i64, w: i64, h: i64) -> Option<[f64; 3]> {
        let region = self.crop_clamped(x, y, w, h)?;
        let n = (region.width * region.height) as f64;
        let mut sum = [0.0f64; 3];
        for px in region.data.chunks_exact(3) {
            sum[0] += px[0] as f64;
            sum[1] += px[1] as f64;
            sum[2] += px[2] as f64;
        }
        Some([sum[0] / n, sum[1] / n, sum[2] / n])
    }

    /// Resize frame (nearest neighbour)
    pub fn resize(&self, new_width: u32, new_height: u32) -> VideoFrame {
        let mut resized = Vec::with_capacity((new_width * new_height * 3) as usize);

        let x_ratio = self.width as f32 / new_width as f32;
        let y_ratio = self.height as f32 / new_height as f32;

        for y in 0..new_height {
            for x in 0..new_width {
                let x0 = ((x as f32 * x_ratio).floor() as u32).min(self.width.saturating_sub(1));
                let y0 = ((y as f32 * y_ratio).floor() as u32).min(self.height.saturating_sub(1));
                let pixel = self.get_pixel(x0, y0).unwrap_or([0, 0, 0]);
                resized.extend_from_slice(&pixel);
            }
        }

        VideoFrame {
            data: resized,
            width: new_width,
            height: new_height,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        }
    }

    /// Mirror horizontally in place (selfie view)
    pub fn flip_horizontal(&mut self) {
        let row_len = (self.width * 3) as usize;
        for row in self.data.chunks_exact_mut(row_len) {
            let pixels = self.width as usize;
            for i in 0..pixels / 2 {
                let j = pixels - 1 - i;
                for c in 0..3 {
                    row.swap(i * 3 + c, j * 3 + c);
                }
            }
        }
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    // Luminance formula: 0.299*R + 0.587*G + 0.114*B
    (r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_brightness() {
        let frame = VideoFrame::filled(4, 4, [100, 100, 100], 0);
        assert!((frame.mean_brightness() - 100.0).abs() < 1.0);

        let dark = VideoFrame::filled(4, 4, [0, 0, 0], 0);
        assert_eq!(dark.mean_brightness(), 0.0);
    }

    #[test]
    fn test_crop_bounds() {
        let frame = VideoFrame::filled(10, 10, [1, 2, 3], 0);
        assert!(frame.crop(5, 5, 6, 2).is_none());
        let c = frame.crop(2, 2, 3, 4).unwrap();
        assert_eq!((c.width, c.height), (3, 4));
        assert_eq!(c.data.len(), 36);

        let clamped = frame.crop_clamped(-5, -5, 8, 8).unwrap();
        assert_eq!((clamped.width, clamped.height), (3, 3));
        assert!(frame.crop_clamped(20, 20, 5, 5).is_none());
    }

    #[test]
    fn test_flip_horizontal() {
        let mut frame = VideoFrame::new(vec![1, 1, 1, 2, 2, 2, 3, 3, 3], 3, 1, 0, 0);
        frame.flip_horizontal();
        assert_eq!(frame.data, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
    }

    #[test]
    fn test_timestamp_secs() {
        let frame = VideoFrame::filled(1, 1, [0, 0, 0], 2_500_000_000);
        assert!((frame.timestamp_secs() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_region_mean() {
        let frame = VideoFrame::filled(8, 8, [10, 20, 30], 0);
        let mean = frame.region_mean(2, 2, 4, 4).unwrap();
        assert_eq!(mean, [10.0, 20.0, 30.0]);
    }
}
