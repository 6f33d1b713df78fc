pub mod bands;
pub mod builder;
pub mod generators;
pub mod peaks;
pub mod sequence;
pub mod spectrum;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Window length mismatch: expected {expected} samples, got {actual}")]
    WindowLength { expected: usize, actual: usize },
    #[error("Non-finite peak height {value} in band {band}")]
    NonFinite { band: usize, value: f64 },
    #[error("Sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRate { expected: f64, actual: f64 },
    #[error("Sequence too short: need at least {needed} samples, have {actual}")]
    SequenceTooShort { needed: usize, actual: usize },
    #[error("Label has {actual} entries, expected {expected}")]
    LabelWidth { expected: usize, actual: usize },
    #[error("Normalization vector has {actual} entries, expected {expected}")]
    Normalization { expected: usize, actual: usize },
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, FeatureError>;

/// A spectral sample or detected peak: frequency in Hz, magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Analysis parameters shared by every stage of the pipeline.
///
/// Notes are MIDI note numbers; the band grid covers
/// `lowest_note..highest_note` in steps of `band_size` semitones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Sampling frequency of the incoming windows, in Hz.
    pub sampling_frequency: f64,
    /// Samples per analysis window.
    pub window_size: usize,
    /// Offset between the two windows of a pair, and between consecutive pairs.
    pub step_size: usize,
    /// First note of the band grid (inclusive).
    pub lowest_note: i32,
    /// End of the band grid (exclusive).
    pub highest_note: i32,
    /// Width of one band in semitones.
    pub band_size: f64,
    /// Number of windows in the RMS moving average used by peak heights.
    pub rms_moving_average_size: usize,
    /// Peak threshold relative to the window RMS.
    pub peak_floor: f64,
    /// Absolute lower bound for the peak threshold.
    pub min_peak_magnitude: f64,
    /// Minimum distance between two reported peaks, in semitones.
    pub min_peak_separation: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            sampling_frequency: 44100.0,
            window_size: 8192,
            step_size: 1024,
            lowest_note: 21,
            highest_note: 109,
            band_size: 1.0,
            rms_moving_average_size: 20,
            peak_floor: 0.05,
            min_peak_magnitude: 1e-4,
            min_peak_separation: 0.5,
        }
    }
}

impl Configuration {
    /// Number of bands in the grid; every feature vector has this length.
    pub fn band_count(&self) -> usize {
        (f64::from(self.highest_note - self.lowest_note) / self.band_size).round() as usize
    }

    /// Frequency resolution of one FFT bin.
    pub fn base_frequency(&self) -> f64 {
        self.sampling_frequency / self.window_size as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 4 {
            return Err(FeatureError::Configuration(format!(
                "window_size must be at least 4, got {}",
                self.window_size
            )));
        }
        if self.step_size == 0 || self.step_size > self.window_size {
            return Err(FeatureError::Configuration(format!(
                "step_size must be in 1..={}, got {}",
                self.window_size, self.step_size
            )));
        }
        if !(self.sampling_frequency > 0.0) {
            return Err(FeatureError::Configuration(
                "sampling_frequency must be positive".into(),
            ));
        }
        if !(self.band_size > 0.0) {
            return Err(FeatureError::Configuration(
                "band_size must be positive".into(),
            ));
        }
        if self.highest_note <= self.lowest_note || self.band_count() == 0 {
            return Err(FeatureError::Configuration(format!(
                "empty note range {}..{}",
                self.lowest_note, self.highest_note
            )));
        }
        if self.rms_moving_average_size == 0 {
            return Err(FeatureError::Configuration(
                "rms_moving_average_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Root mean square amplitude of a window. Empty input yields 0.
pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.band_count(), 88);
        assert!((config.base_frequency() - 44100.0 / 8192.0).abs() < 1e-12);
    }

    #[test]
    fn test_half_semitone_bands() {
        let config = Configuration {
            band_size: 0.5,
            ..Configuration::default()
        };
        assert_eq!(config.band_count(), 176);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_step = Configuration {
            step_size: 0,
            ..Configuration::default()
        };
        assert!(bad_step.validate().is_err());

        let big_step = Configuration {
            step_size: 10_000,
            ..Configuration::default()
        };
        assert!(big_step.validate().is_err());

        let empty_notes = Configuration {
            lowest_note: 60,
            highest_note: 60,
            ..Configuration::default()
        };
        assert!(empty_notes.validate().is_err());

        let no_history = Configuration {
            rms_moving_average_size: 0,
            ..Configuration::default()
        };
        assert!(no_history.validate().is_err());
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-12);
        assert!((rms(&[3.0, 4.0]) - (12.5f64).sqrt()).abs() < 1e-12);
    }
}
