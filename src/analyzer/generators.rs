//! Per-band feature generators.
//!
//! Each generator turns one window's spectrum or peaks into a vector of
//! `band_count` values. They are driven by [`FeatureBuilder`], which owns a
//! fixed set of them.
//!
//! [`FeatureBuilder`]: super::builder::FeatureBuilder

use super::bands::{freq_to_note, note_to_freq};
use super::{Configuration, FeatureError, Point, Result};

/// Lower bound applied to window RMS before it enters the moving average.
pub const MIN_RMS: f64 = 0.0001;

/// Common surface of every band generator.
pub trait BandsFeatureGenerator {
    /// Return internal state to its initial values.
    fn reset(&mut self);

    /// Output of the most recent update, one value per band.
    fn data(&self) -> &[f64];
}

/// Optional per-band affine normalization `(value - offset) / scale`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandNormalization {
    offsets: Option<Vec<f64>>,
    scales: Option<Vec<f64>>,
}

impl BandNormalization {
    pub fn new(
        band_count: usize,
        offsets: Option<Vec<f64>>,
        scales: Option<Vec<f64>>,
    ) -> Result<Self> {
        let normalization = Self { offsets, scales };
        normalization.check_band_count(band_count)?;
        Ok(normalization)
    }

    /// Every supplied vector must have exactly `band_count` entries.
    pub fn check_band_count(&self, band_count: usize) -> Result<()> {
        for values in [&self.offsets, &self.scales].into_iter().flatten() {
            if values.len() != band_count {
                return Err(FeatureError::Normalization {
                    expected: band_count,
                    actual: values.len(),
                });
            }
        }
        Ok(())
    }

    pub fn apply(&self, band: usize, value: f64) -> f64 {
        let offset = self.offsets.as_ref().map_or(0.0, |o| o[band]);
        let scale = self.scales.as_ref().map_or(1.0, |s| s[band]);
        (value - offset) / scale
    }
}

/// Samples the magnitude spectrum at each band's frequency range.
#[derive(Debug, Clone)]
pub struct SpectrumFeatureGenerator {
    configuration: Configuration,
    normalization: BandNormalization,
    spectrum: Vec<f64>,
}

impl SpectrumFeatureGenerator {
    pub fn new(configuration: &Configuration) -> Self {
        Self {
            configuration: configuration.clone(),
            normalization: BandNormalization::default(),
            spectrum: vec![0.0; configuration.band_count()],
        }
    }

    pub fn with_normalization(mut self, normalization: BandNormalization) -> Result<Self> {
        normalization.check_band_count(self.configuration.band_count())?;
        self.normalization = normalization;
        Ok(self)
    }

    /// `spectrum[i]` is the magnitude at `i * base_frequency` Hz.
    pub fn update(&mut self, spectrum: &[f64], base_frequency: f64) {
        let half_band = self.configuration.band_size / 2.0;

        for band in 0..self.spectrum.len() {
            let note = self.configuration.note_for_band(band);
            let low_bin = note_to_freq(note - half_band) / base_frequency;
            let high_bin = note_to_freq(note + half_band) / base_frequency;

            let first = (low_bin.ceil() as usize).min(spectrum.len());
            let last = (high_bin.ceil() as usize).min(spectrum.len());

            let value = if first < last {
                let bins = &spectrum[first..last];
                bins.iter().sum::<f64>() / bins.len() as f64
            } else {
                // Band narrower than one bin
                interpolate(spectrum, note_to_freq(note) / base_frequency)
            };

            self.spectrum[band] = self.normalization.apply(band, value);
        }
    }
}

impl BandsFeatureGenerator for SpectrumFeatureGenerator {
    fn reset(&mut self) {
        self.spectrum.fill(0.0);
    }

    fn data(&self) -> &[f64] {
        &self.spectrum
    }
}

fn interpolate(spectrum: &[f64], position: f64) -> f64 {
    let index = position.floor() as usize;
    let frac = position - position.floor();
    match (spectrum.get(index), spectrum.get(index + 1)) {
        (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
        (Some(a), None) => *a,
        _ => 0.0,
    }
}

/// Tallest peak per band, relative to a moving average of window RMS.
#[derive(Debug, Clone)]
pub struct PeakHeightsFeatureGenerator {
    configuration: Configuration,
    normalization: BandNormalization,
    rms_history: Vec<f64>,
    rms_history_index: usize,
    rms_average: f64,
    peak_heights: Vec<f64>,
}

impl PeakHeightsFeatureGenerator {
    pub fn new(configuration: &Configuration) -> Self {
        let mut generator = Self {
            configuration: configuration.clone(),
            normalization: BandNormalization::default(),
            rms_history: vec![MIN_RMS; configuration.rms_moving_average_size.max(1)],
            rms_history_index: 0,
            rms_average: MIN_RMS,
            peak_heights: vec![0.0; configuration.band_count()],
        };
        generator.reset();
        generator
    }

    pub fn with_normalization(mut self, normalization: BandNormalization) -> Result<Self> {
        normalization.check_band_count(self.configuration.band_count())?;
        self.normalization = normalization;
        Ok(self)
    }

    pub fn rms_average(&self) -> f64 {
        self.rms_average
    }

    pub fn update(&mut self, peaks: &[Point], rms: f64) -> Result<()> {
        let safe_rms = rms.max(MIN_RMS);

        let scale = 1.0 / self.rms_history.len() as f64;
        self.rms_average += (safe_rms - self.rms_history[self.rms_history_index]) * scale;
        self.rms_history[self.rms_history_index] = safe_rms;
        self.rms_history_index = (self.rms_history_index + 1) % self.rms_history.len();

        self.peak_heights.fill(0.0);
        let mut touched = vec![false; self.peak_heights.len()];

        for peak in peaks {
            let Some(band) = self.configuration.band_for_frequency(peak.x) else {
                continue;
            };
            let height = (peak.y / self.rms_average).max(self.peak_heights[band]);
            if !height.is_finite() {
                return Err(FeatureError::NonFinite {
                    band,
                    value: height,
                });
            }
            self.peak_heights[band] = height;
            touched[band] = true;
        }

        for (band, height) in self.peak_heights.iter_mut().enumerate() {
            if touched[band] {
                *height = self.normalization.apply(band, *height);
                if !height.is_finite() {
                    return Err(FeatureError::NonFinite {
                        band,
                        value: *height,
                    });
                }
            }
        }

        Ok(())
    }
}

impl BandsFeatureGenerator for PeakHeightsFeatureGenerator {
    fn reset(&mut self) {
        self.rms_history.fill(MIN_RMS);
        self.rms_history_index = 0;
        self.rms_average = MIN_RMS;
        self.peak_heights.fill(0.0);
    }

    fn data(&self) -> &[f64] {
        &self.peak_heights
    }
}

/// How close the tallest peak in each band sits to the band's centre note.
///
/// The score is `1 - |centre - peak note|` and is not clamped: with bands
/// wider than two semitones it can go negative, which callers must read as
/// "no usable peak".
#[derive(Debug, Clone)]
pub struct PeakLocationsFeatureGenerator {
    configuration: Configuration,
    peak_locations: Vec<f64>,
    peaks_by_band: Vec<Option<Point>>,
}

impl PeakLocationsFeatureGenerator {
    pub fn new(configuration: &Configuration) -> Self {
        let band_count = configuration.band_count();
        Self {
            configuration: configuration.clone(),
            peak_locations: vec![0.0; band_count],
            peaks_by_band: vec![None; band_count],
        }
    }

    pub fn update(&mut self, peaks: &[Point]) {
        self.peaks_by_band.fill(None);

        for peak in peaks {
            let Some(band) = self.configuration.band_for_frequency(peak.x) else {
                continue;
            };
            if self.peaks_by_band[band].is_none_or(|existing| existing.y < peak.y) {
                self.peaks_by_band[band] = Some(*peak);
            }
        }

        for (band, location) in self.peak_locations.iter_mut().enumerate() {
            *location = match self.peaks_by_band[band] {
                Some(peak) => {
                    let note = self.configuration.note_for_band(band);
                    1.0 - (note - freq_to_note(peak.x)).abs()
                }
                None => 0.0,
            };
        }
    }
}

impl BandsFeatureGenerator for PeakLocationsFeatureGenerator {
    fn reset(&mut self) {
        self.peak_locations.fill(0.0);
        self.peaks_by_band.fill(None);
    }

    fn data(&self) -> &[f64] {
        &self.peak_locations
    }
}

/// Element-wise first difference between two band vectors.
#[derive(Debug, Clone)]
pub struct FluxFeatureGenerator {
    flux: Vec<f64>,
    previous: Vec<f64>,
}

impl FluxFeatureGenerator {
    pub fn new(configuration: &Configuration) -> Self {
        let band_count = configuration.band_count();
        Self {
            flux: vec![0.0; band_count],
            previous: vec![0.0; band_count],
        }
    }

    /// Frame-pair flux: `data1 - data0`.
    pub fn update(&mut self, data0: &[f64], data1: &[f64]) {
        debug_assert_eq!(data0.len(), self.flux.len());
        debug_assert_eq!(data1.len(), self.flux.len());
        for ((flux, a), b) in self.flux.iter_mut().zip(data0).zip(data1) {
            *flux = b - a;
        }
    }

    /// Temporal flux: `data` minus the input of the previous call.
    pub fn update_temporal(&mut self, data: &[f64]) {
        debug_assert_eq!(data.len(), self.flux.len());
        for ((flux, previous), value) in self.flux.iter_mut().zip(&mut self.previous).zip(data) {
            *flux = value - *previous;
            *previous = *value;
        }
    }
}

impl BandsFeatureGenerator for FluxFeatureGenerator {
    fn reset(&mut self) {
        self.flux.fill(0.0);
        self.previous.fill(0.0);
    }

    fn data(&self) -> &[f64] {
        &self.flux
    }
}
