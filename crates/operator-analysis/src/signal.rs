//! Frequency-domain helpers for the pulse signal

use rustfft::{num_complex::Complex, FftPlanner};

/// Subtract the least-squares line through the samples
pub fn detrend(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = signal.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &y) in signal.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    signal
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (mean_y + slope * (i as f64 - mean_x)))
        .collect()
}

/// Zero mean, unit variance
pub fn normalize(signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let n = signal.len() as f64;
    let mean = signal.iter().sum::<f64>() / n;
    let std = (signal.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt();
    signal.iter().map(|v| (v - mean) / (std + 1e-10)).collect()
}

/// Apply Hamming window to reduce spectral leakage
pub fn apply_hamming_window(signal: &mut [f64]) {
    let n = signal.len();
    if n < 2 {
        return;
    }
    for (i, v) in signal.iter_mut().enumerate() {
        *v *= 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos();
    }
}

/// One positive-frequency bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub frequency: f64,
    pub magnitude: f64,
}

/// FFT analyzer with a cached planner
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    fn forward(&mut self, signal: &[f64]) -> Vec<Complex<f64>> {
        let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&v| Complex::new(v, 0.0)).collect();
        let fft = self.planner.plan_fft_forward(buffer.len());
        fft.process(&mut buffer);
        buffer
    }

    /// Keep only content between `low` and `high` Hz
    pub fn band_limit(&mut self, signal: &[f64], sample_rate: f64, low: f64, high: f64) -> Vec<f64> {
        let n = signal.len();
        if n == 0 || sample_rate <= 0.0 {
            return Vec::new();
        }
        let mut buffer = self.forward(signal);
        let resolution = sample_rate / n as f64;
        for (i, c) in buffer.iter_mut().enumerate() {
            // bins above n/2 mirror negative frequencies
            let k = if i <= n / 2 { i } else { n - i };
            let freq = k as f64 * resolution;
            if freq < low || freq > high {
                *c = Complex::new(0.0, 0.0);
            }
        }
        let ifft = self.planner.plan_fft_inverse(n);
        ifft.process(&mut buffer);
        buffer.iter().map(|c| c.re / n as f64).collect()
    }

    /// Magnitude spectrum over positive frequencies (DC excluded)
    pub fn magnitudes(&mut self, signal: &[f64], sample_rate: f64) -> Vec<Bin> {
        let n = signal.len();
        if n < 2 || sample_rate <= 0.0 {
            return Vec::new();
        }
        let buffer = self.forward(signal);
        let resolution = sample_rate / n as f64;
        buffer
            .iter()
            .enumerate()
            .take(n / 2)
            .skip(1)
            .map(|(i, c)| Bin {
                frequency: i as f64 * resolution,
                magnitude: c.norm(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn test_detrend_removes_line() {
        let line: Vec<f64> = (0..20).map(|i| 3.0 + 0.5 * i as f64).collect();
        assert!(detrend(&line).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_spectrum_peak() {
        let mut analyzer = SpectrumAnalyzer::new();
        let bins = analyzer.magnitudes(&sine(1.5, 30.0, 300), 30.0);
        let peak = bins.iter().max_by(|a, b| a.magnitude.total_cmp(&b.magnitude)).unwrap();
        assert!((peak.frequency - 1.5).abs() < 0.11);
    }

    #[test]
    fn test_band_limit_drops_out_of_band() {
        let mut analyzer = SpectrumAnalyzer::new();
        let mixed: Vec<f64> = sine(1.2, 30.0, 300)
            .iter()
            .zip(sine(8.0, 30.0, 300))
            .map(|(a, b)| a + b)
            .collect();
        let filtered = analyzer.band_limit(&mixed, 30.0, 0.7, 3.5);
        let bins = analyzer.magnitudes(&filtered, 30.0);
        let high: f64 = bins.iter().filter(|b| b.frequency > 5.0).map(|b| b.magnitude).sum();
        let low: f64 = bins.iter().filter(|b| b.frequency < 2.0).map(|b| b.magnitude).sum();
        assert!(high < 1e-6 * low.max(1.0));
    }

    #[test]
    fn test_empty_signal() {
        let mut analyzer = SpectrumAnalyzer::new();
        assert!(analyzer.magnitudes(&[], 30.0).is_empty());
        assert!(normalize(&[]).is_empty());
    }

    proptest::proptest! {
        #[test]
        fn test_normalize_gives_unit_variance(signal in proptest::collection::vec(-100.0f64..100.0, 2..200)) {
            let spread = signal.iter().cloned().fold(f64::MIN, f64::max) - signal.iter().cloned().fold(f64::MAX, f64::min);
            proptest::prop_assume!(spread > 1e-3);
            let out = normalize(&signal);
            let n = out.len() as f64;
            let mean = out.iter().sum::<f64>() / n;
            let var = out.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            proptest::prop_assert!(mean.abs() < 1e-6);
            proptest::prop_assert!((var - 1.0).abs() < 1e-3);
        }

        #[test]
        fn test_detrend_leaves_zero_mean(signal in proptest::collection::vec(-100.0f64..100.0, 2..200)) {
            let out = detrend(&signal);
            proptest::prop_assert_eq!(out.len(), signal.len());
            proptest::prop_assert!((out.iter().sum::<f64>() / out.len() as f64).abs() < 1e-6);
        }
    }
}
