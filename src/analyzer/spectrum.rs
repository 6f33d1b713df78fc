// Windowed spectrum analysis
//
// Converts a fixed-length window of samples into a magnitude spectrum of
// window_size / 2 bins. Buffers are owned by the analyzer and the caller so
// the hot loop never allocates once warmed up.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::{FeatureError, Point, Result};

/// Hamming-windowed forward FFT producing magnitude spectra.
pub struct SpectrumAnalyzer {
    window_size: usize,
    /// Hamming window (pre-computed)
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl SpectrumAnalyzer {
    pub fn new(window_size: usize) -> Self {
        let window = hamming_window(window_size);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(window_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            window_size,
            window,
            fft,
            buffer: Vec::with_capacity(window_size),
            scratch,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn window(&self) -> &[f64] {
        &self.window
    }

    /// Compute the magnitude spectrum of `samples` into `results`.
    ///
    /// `results` is resized to `window_size / 2`; its allocation is reused
    /// across calls. Magnitudes are scaled by `2 / window_size` so a full
    /// scale sinusoid reads as roughly its amplitude times the window's
    /// coherent gain.
    pub fn magnitudes(&mut self, samples: &[f64], results: &mut Vec<f64>) -> Result<()> {
        if samples.len() != self.window_size {
            return Err(FeatureError::WindowLength {
                expected: self.window_size,
                actual: samples.len(),
            });
        }

        self.buffer.clear();
        self.buffer.extend(
            samples
                .iter()
                .zip(&self.window)
                .map(|(s, w)| Complex::new(s * w, 0.0)),
        );

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 2.0 / self.window_size as f64;
        let half = self.window_size / 2;
        results.clear();
        results.extend(self.buffer[..half].iter().map(|c| c.norm_sqr().sqrt() * scale));
        Ok(())
    }
}

/// Symmetric Hamming window of length `n`.
pub fn hamming_window(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

/// Rewrite `points` in place as `(bin frequency, magnitude)` pairs.
pub fn spectrum_points(spectrum: &[f64], base_frequency: f64, points: &mut Vec<Point>) {
    points.clear();
    points.extend(
        spectrum
            .iter()
            .enumerate()
            .map(|(i, &v)| Point::new(base_frequency * i as f64, v)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f64, amplitude: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_hamming_window_shape() {
        let w = hamming_window(9);
        assert!((w[0] - 0.08).abs() < 1e-12);
        assert!((w[8] - 0.08).abs() < 1e-12);
        assert!((w[4] - 1.0).abs() < 1e-12);
        assert_eq!(hamming_window(1), vec![1.0]);
    }

    #[test]
    fn test_spectrum_length_and_reuse() {
        let mut analyzer = SpectrumAnalyzer::new(1024);
        let mut results = Vec::new();
        analyzer.magnitudes(&vec![0.0; 1024], &mut results).unwrap();
        assert_eq!(results.len(), 512);
        assert!(results.iter().all(|&v| v == 0.0));

        let capacity = results.capacity();
        analyzer.magnitudes(&vec![0.5; 1024], &mut results).unwrap();
        assert_eq!(results.len(), 512);
        assert_eq!(results.capacity(), capacity);
    }

    #[test]
    fn test_window_length_mismatch() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let mut results = Vec::new();
        let err = analyzer.magnitudes(&[0.0; 100], &mut results).unwrap_err();
        assert_eq!(
            err,
            FeatureError::WindowLength {
                expected: 256,
                actual: 100
            }
        );
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let n = 1024;
        let sample_rate = 8000.0;
        // Exactly on bin 64
        let frequency = 64.0 * sample_rate / n as f64;
        let mut analyzer = SpectrumAnalyzer::new(n);
        let mut results = Vec::new();
        analyzer
            .magnitudes(&sine(frequency, 1.0, sample_rate, n), &mut results)
            .unwrap();

        let (max_bin, max_value) = results
            .iter()
            .enumerate()
            .fold((0, 0.0), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(max_bin, 64);
        // Hamming coherent gain is ~0.54
        assert!((max_value - 0.54).abs() < 0.01, "peak magnitude {max_value}");
    }

    #[test]
    fn test_deterministic() {
        let samples = sine(440.0, 0.3, 44100.0, 2048);
        let mut analyzer = SpectrumAnalyzer::new(2048);
        let mut a = Vec::new();
        let mut b = Vec::new();
        analyzer.magnitudes(&samples, &mut a).unwrap();
        analyzer.magnitudes(&samples, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_spectrum_points() {
        let mut points = vec![Point::new(9.0, 9.0); 5];
        spectrum_points(&[1.0, 2.0, 3.0], 10.0, &mut points);
        assert_eq!(
            points,
            vec![Point::new(0.0, 1.0), Point::new(10.0, 2.0), Point::new(20.0, 3.0)]
        );
    }
}
