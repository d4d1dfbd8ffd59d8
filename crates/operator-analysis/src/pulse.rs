//! Remote photoplethysmography (rPPG)
//!
//! Blood volume changes tint the skin slightly red with every heartbeat.
//! We sample the chromaticity of three skin patches (forehead and both
//! cheeks), keep a few seconds of that signal and look for the dominant
//! frequency between 40 and 180 beats per minute.

use crate::signal::{apply_hamming_window, detrend, normalize, Bin, SpectrumAnalyzer};
use crate::AnalysisError;
use calibration::statistics::{mean, median};
use calibration::AnalysisBaseline;
use camera_capture::{FaceLandmarks, VideoFrame};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

/// Samples kept (10 s at 30 fps)
const BUFFER: usize = 300;
const BPM_HISTORY: usize = 30;
const MIN_SECONDS: f64 = 2.0;
const MIN_SAMPLES: usize = 16;

const BAND_LOW_HZ: f64 = 0.7;
const BAND_HIGH_HZ: f64 = 3.5;
const MIN_BPM: f64 = 40.0;
const MAX_BPM: f64 = 180.0;
pub const DEFAULT_BPM: u32 = 72;

/// Share of ROI pixels that must look like skin
const MIN_SKIN_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStatus {
    Normal,
    Bradycardia,
    TachycardiaMild,
    Tachycardia,
    Abnormal,
}

impl PulseStatus {
    pub fn from_bpm(bpm: u32) -> Self {
        match bpm {
            60..=100 => Self::Normal,
            50..=59 => Self::Bradycardia,
            101..=120 => Self::TachycardiaMild,
            121.. => Self::Tachycardia,
            _ => Self::Abnormal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingMode {
    Low,
    Normal,
    High,
}

impl LightingMode {
    pub fn from_brightness(brightness: f64) -> Self {
        if brightness < 50.0 {
            Self::Low
        } else if brightness > 200.0 {
            Self::High
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PulseReading {
    /// Filtered heart rate
    pub bpm: u32,
    /// Estimate from the current window, when it was accepted
    pub instant_bpm: Option<f64>,
    pub confidence: f64,
    /// 0-1 from the spectral SNR
    pub quality: f64,
    pub snr: f64,
    /// 0-100 from RMSSD of the beat intervals
    pub hrv: u32,
    pub status: PulseStatus,
    pub lighting: LightingMode,
    /// A confident estimate was produced for this frame
    pub is_valid: bool,
    pub is_calibrated: bool,
}

struct Estimate {
    bpm: f64,
    confidence: f64,
    snr: f64,
}

/// Mean RGB of a patch and the share of its pixels that look like skin
fn patch(frame: &VideoFrame, x: f64, y: f64, w: f64, h: f64) -> Option<([f64; 3], f64)> {
    let region = frame.crop_clamped(x as i64, y as i64, w as i64, h as i64)?;
    let mut sum = [0.0f64; 3];
    let mut skin = 0usize;
    let mut n = 0usize;
    for px in region.data.chunks_exact(3) {
        sum[0] += px[0] as f64;
        sum[1] += px[1] as f64;
        sum[2] += px[2] as f64;
        if is_skin(px[0], px[1], px[2]) {
            skin += 1;
        }
        n += 1;
    }
    if n == 0 {
        return None;
    }
    let n = n as f64;
    Some(([sum[0] / n, sum[1] / n, sum[2] / n], skin as f64 / n))
}

/// HSV skin test: reddish hue, some saturation, not too dark
fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if max < 70.0 || max <= 0.0 || delta / max * 255.0 < 20.0 {
        return false;
    }
    let hue = if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    hue <= 40.0 || hue >= 340.0
}

/// Chrominance value 3r - 2g on normalised RGB
fn chrominance(rgb: [f64; 3]) -> f64 {
    let total = rgb[0] + rgb[1] + rgb[2];
    if total <= 0.0 {
        return 0.0;
    }
    3.0 * rgb[0] / total - 2.0 * rgb[1] / total
}

/// Forehead and cheek rectangles (x, y, w, h) with their weights
fn regions(landmarks: &FaceLandmarks) -> [((f64, f64, f64, f64), f64); 3] {
    let (b1, b2) = (landmarks.point(19), landmarks.point(24));
    let (fx, fy) = ((b1.x + b2.x) / 2.0, (b1.y + b2.y) / 2.0 - 30.0);
    let nose = landmarks.point(33);
    [
        ((fx - 40.0, fy - 20.0, 80.0, 40.0), 0.6),
        ((nose.x - 60.0, nose.y - 20.0, 40.0, 40.0), 0.2),
        ((nose.x + 20.0, nose.y - 20.0, 40.0, 40.0), 0.2),
    ]
}

/// Weighted mean with outliers beyond 2.5 MAD removed and recent values favoured
fn stable_bpm(history: &VecDeque<f64>) -> Option<f64> {
    let values: Vec<f64> = history.iter().copied().collect();
    match values.len() {
        0 => return None,
        1 | 2 => return values.last().copied(),
        _ => {}
    }
    let med = median(&values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    let mad = median(&deviations);
    let limit = if mad > 0.0 { 2.5 * mad } else { 10.0 };
    let kept: Vec<f64> = values.into_iter().filter(|v| (v - med).abs() <= limit).collect();
    if kept.is_empty() {
        return Some(med);
    }
    let n = kept.len();
    let weight = |i: usize| {
        if n == 1 {
            1.0
        } else {
            0.5 + 0.5 * i as f64 / (n - 1) as f64
        }
    };
    let total: f64 = (0..n).map(weight).sum();
    Some(kept.iter().enumerate().map(|(i, v)| v * weight(i)).sum::<f64>() / total)
}

/// HRV score from the RMSSD of the last beat intervals
fn hrv_score(history: &VecDeque<f64>) -> u32 {
    if history.len() < 5 {
        return 0;
    }
    let intervals: Vec<f64> = history
        .iter()
        .rev()
        .take(10)
        .filter(|b| **b > 0.0)
        .map(|b| 60_000.0 / b)
        .collect();
    if intervals.len() < 2 {
        return 0;
    }
    let squares: Vec<f64> = intervals.windows(2).map(|w| (w[1] - w[0]).powi(2)).collect();
    let rmssd = mean(&squares).sqrt();
    (rmssd / 50.0 * 100.0).min(100.0) as u32
}

pub struct PulseEstimator {
    spectrum: SpectrumAnalyzer,
    samples: VecDeque<(f64, f64)>,
    history: VecDeque<f64>,
    reference_brightness: Option<f64>,
}

impl Default for PulseEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseEstimator {
    pub fn new() -> Self {
        Self {
            spectrum: SpectrumAnalyzer::new(),
            samples: VecDeque::with_capacity(BUFFER),
            history: VecDeque::with_capacity(BPM_HISTORY),
            reference_brightness: None,
        }
    }

    /// Use the calibration lighting as the brightness reference
    pub fn set_baseline(&mut self, baseline: Option<&AnalysisBaseline>) {
        self.reference_brightness = baseline
            .map(|b| b.environment_conditions.lighting_average)
            .filter(|l| *l > 0.0);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn sample(&self, frame: &VideoFrame, landmarks: &FaceLandmarks, brightness: f64) -> Result<f64, AnalysisError> {
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for ((x, y, w, h), weight) in regions(landmarks) {
            if let Some((rgb, skin)) = patch(frame, x, y, w, h) {
                if skin >= MIN_SKIN_RATIO {
                    weighted += weight * chrominance(rgb);
                    weights += weight;
                }
            }
        }
        if weights == 0.0 {
            return Err(AnalysisError::NoSkin);
        }
        let mut value = weighted / weights;
        if let Some(reference) = self.reference_brightness {
            if brightness > 0.0 {
                value *= (reference / brightness).clamp(0.5, 2.0);
            }
        }
        Ok(value)
    }

    fn estimate(&mut self) -> Result<Estimate, AnalysisError> {
        let n = self.samples.len();
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(f), Some(l)) => (f.0, l.0),
            _ => return Err(AnalysisError::InsufficientSamples(0.0)),
        };
        let duration = last - first;
        if n < MIN_SAMPLES || duration < MIN_SECONDS {
            return Err(AnalysisError::InsufficientSamples(duration));
        }
        let rate = (n - 1) as f64 / duration;

        let raw: Vec<f64> = self.samples.iter().map(|s| s.1).collect();
        let filtered = self.spectrum.band_limit(&detrend(&raw), rate, BAND_LOW_HZ, BAND_HIGH_HZ);
        let mut signal = normalize(&filtered);
        apply_hamming_window(&mut signal);
        let bins = self.spectrum.magnitudes(&signal, rate);

        let band: Vec<(usize, &Bin)> = bins
            .iter()
            .enumerate()
            .filter(|(_, b)| (MIN_BPM..=MAX_BPM).contains(&(b.frequency * 60.0)))
            .collect();
        let band_max = band.iter().map(|(_, b)| b.magnitude).fold(0.0, f64::max);
        if band_max <= 0.0 {
            return Err(AnalysisError::NoPeak);
        }

        let is_local_peak = |i: usize| {
            let m = bins[i].magnitude;
            (i == 0 || bins[i - 1].magnitude <= m) && (i + 1 >= bins.len() || bins[i + 1].magnitude <= m)
        };
        let (peak_idx, peak) = band
            .iter()
            .filter(|(i, b)| b.magnitude >= 0.3 * band_max && is_local_peak(*i))
            .max_by(|a, b| a.1.magnitude.total_cmp(&b.1.magnitude))
            .map(|(i, b)| (*i, **b))
            .ok_or(AnalysisError::NoPeak)?;

        let band_mean = band.iter().map(|(_, b)| b.magnitude).sum::<f64>() / band.len() as f64;
        let global_max = bins.iter().map(|b| b.magnitude).fold(0.0, f64::max);
        let mut confidence = 0.5;
        if peak.magnitude > 2.0 * band_mean {
            confidence += 0.3;
        }
        if peak.magnitude >= global_max {
            confidence += 0.2;
        }

        let noise: Vec<f64> = band
            .iter()
            .filter(|(i, _)| i.abs_diff(peak_idx) > 2)
            .map(|(_, b)| b.magnitude * b.magnitude)
            .collect();
        let noise_power = mean(&noise);
        let snr = if noise_power > 0.0 {
            peak.magnitude * peak.magnitude / noise_power
        } else {
            10.0
        };

        Ok(Estimate {
            bpm: peak.frequency * 60.0,
            confidence,
            snr,
        })
    }

    /// Feed one frame; `now` in seconds
    pub fn analyze(&mut self, frame: &VideoFrame, landmarks: &FaceLandmarks, now: f64) -> PulseReading {
        let brightness = frame.mean_brightness();
        let mut reading = PulseReading {
            bpm: DEFAULT_BPM,
            instant_bpm: None,
            confidence: 0.0,
            quality: 0.0,
            snr: 0.0,
            hrv: 0,
            status: PulseStatus::Normal,
            lighting: LightingMode::from_brightness(brightness),
            is_valid: false,
            is_calibrated: self.reference_brightness.is_some(),
        };

        match self.sample(frame, landmarks, brightness) {
            Ok(value) => {
                if self.samples.len() == BUFFER {
                    self.samples.pop_front();
                }
                self.samples.push_back((now, value));
            }
            Err(e) => debug!("Pulse sample skipped: {}", e),
        }

        match self.estimate() {
            Ok(est) => {
                reading.confidence = est.confidence;
                reading.snr = est.snr;
                reading.quality = (est.snr / 10.0).min(1.0);
                if est.confidence > 0.5 {
                    if self.history.len() == BPM_HISTORY {
                        self.history.pop_front();
                    }
                    self.history.push_back(est.bpm);
                    reading.instant_bpm = Some(est.bpm);
                    reading.is_valid = true;
                }
            }
            Err(e) => debug!("No pulse estimate: {}", e),
        }

        if let Some(bpm) = stable_bpm(&self.history) {
            reading.bpm = bpm.round() as u32;
        }
        reading.hrv = hrv_score(&self.history);
        reading.status = PulseStatus::from_bpm(reading.bpm);
        reading
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.history.clear();
    }
}
