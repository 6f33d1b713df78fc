use super::generators::{
    BandsFeatureGenerator, FluxFeatureGenerator, PeakHeightsFeatureGenerator,
    PeakLocationsFeatureGenerator, SpectrumFeatureGenerator,
};
use super::peaks::PeakExtractor;
use super::spectrum::{spectrum_points, SpectrumAnalyzer};
use super::{rms, Configuration, FeatureError, Point, Result};

/// One aggregated feature record for a pair of adjacent windows.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub spectrum: Vec<f32>,
    pub spectral_flux: Vec<f32>,
    pub peak_heights: Vec<f32>,
    pub peak_locations: Vec<f32>,
    pub peak_flux: Vec<f32>,
}

impl Feature {
    pub fn new(band_count: usize) -> Self {
        Self {
            spectrum: vec![0.0; band_count],
            spectral_flux: vec![0.0; band_count],
            peak_heights: vec![0.0; band_count],
            peak_locations: vec![0.0; band_count],
            peak_flux: vec![0.0; band_count],
        }
    }

    pub fn band_count(&self) -> usize {
        self.spectrum.len()
    }
}

fn narrow_into(target: &mut Vec<f32>, source: &[f64]) {
    target.clear();
    target.extend(source.iter().map(|&v| v as f32));
}

/// Runs the analyzer, peak extractor and the fixed generator set over pairs
/// of windows `step_size` samples apart.
///
/// Both windows of a pair get their own spectrum and peak-height generator
/// so flux can be taken between "now" and "next".
pub struct FeatureBuilder {
    configuration: Configuration,

    analyzer: SpectrumAnalyzer,
    peak_extractor: PeakExtractor,
    spectrum0: Vec<f64>,
    spectrum1: Vec<f64>,
    points0: Vec<Point>,
    points1: Vec<Point>,

    pub spectrum_feature0: SpectrumFeatureGenerator,
    pub spectrum_feature1: SpectrumFeatureGenerator,
    pub spectrum_flux: FluxFeatureGenerator,
    pub peak_heights0: PeakHeightsFeatureGenerator,
    pub peak_heights1: PeakHeightsFeatureGenerator,
    pub peak_locations: PeakLocationsFeatureGenerator,
    pub peak_flux: FluxFeatureGenerator,
}

impl FeatureBuilder {
    pub fn new(configuration: Configuration) -> Result<Self> {
        configuration.validate()?;
        let half = configuration.window_size / 2;

        Ok(Self {
            analyzer: SpectrumAnalyzer::new(configuration.window_size),
            peak_extractor: PeakExtractor::new(&configuration),
            spectrum0: Vec::with_capacity(half),
            spectrum1: Vec::with_capacity(half),
            points0: Vec::with_capacity(half),
            points1: Vec::with_capacity(half),

            spectrum_feature0: SpectrumFeatureGenerator::new(&configuration),
            spectrum_feature1: SpectrumFeatureGenerator::new(&configuration),
            spectrum_flux: FluxFeatureGenerator::new(&configuration),
            peak_heights0: PeakHeightsFeatureGenerator::new(&configuration),
            peak_heights1: PeakHeightsFeatureGenerator::new(&configuration),
            peak_locations: PeakLocationsFeatureGenerator::new(&configuration),
            peak_flux: FluxFeatureGenerator::new(&configuration),

            configuration,
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Analysis window applied before the FFT.
    pub fn window(&self) -> &[f64] {
        self.analyzer.window()
    }

    pub fn reset(&mut self) {
        self.spectrum_feature0.reset();
        self.spectrum_feature1.reset();
        self.spectrum_flux.reset();

        self.peak_heights0.reset();
        self.peak_heights1.reset();
        self.peak_locations.reset();
        self.peak_flux.reset();
    }

    /// Compute features for the window pair `data0`, `data1` into `feature`.
    pub fn generate_features(
        &mut self,
        data0: &[f64],
        data1: &[f64],
        feature: &mut Feature,
    ) -> Result<()> {
        let rms0 = rms(data0);
        let rms1 = rms(data1);
        let base_frequency = self.configuration.base_frequency();

        // Spectra
        self.analyzer.magnitudes(data0, &mut self.spectrum0)?;
        spectrum_points(&self.spectrum0, base_frequency, &mut self.points0);
        self.spectrum_feature0.update(&self.spectrum0, base_frequency);

        self.analyzer.magnitudes(data1, &mut self.spectrum1)?;
        spectrum_points(&self.spectrum1, base_frequency, &mut self.points1);
        self.spectrum_feature1.update(&self.spectrum1, base_frequency);

        self.spectrum_flux
            .update(self.spectrum_feature0.data(), self.spectrum_feature1.data());

        // Peaks
        let peaks0 = self.peak_extractor.process(&self.points0, rms0);
        let peaks1 = self.peak_extractor.process(&self.points1, rms1);

        self.peak_heights0.update(&peaks0, rms0)?;
        self.peak_heights1.update(&peaks1, rms1)?;
        self.peak_locations.update(&peaks1);
        self.peak_flux
            .update(self.peak_heights0.data(), self.peak_heights1.data());

        narrow_into(&mut feature.spectrum, self.spectrum_feature1.data());
        narrow_into(&mut feature.spectral_flux, self.spectrum_flux.data());
        narrow_into(&mut feature.peak_heights, self.peak_heights1.data());
        narrow_into(&mut feature.peak_locations, self.peak_locations.data());
        narrow_into(&mut feature.peak_flux, self.peak_flux.data());

        Ok(())
    }

    /// Allocating variant of [`generate_features`](Self::generate_features).
    pub fn generate(&mut self, data0: &[f64], data1: &[f64]) -> Result<Feature> {
        let mut feature = Feature::new(self.configuration.band_count());
        self.generate_features(data0, data1, &mut feature)?;
        Ok(feature)
    }

    /// Validate that a window pair came from a signal at the configured rate.
    pub fn check_sample_rate(&self, sample_rate: f64) -> Result<()> {
        if (sample_rate - self.configuration.sampling_frequency).abs() > f64::EPSILON {
            return Err(FeatureError::SampleRate {
                expected: self.configuration.sampling_frequency,
                actual: sample_rate,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::bands::freq_to_note;
    use std::f64::consts::PI;

    fn sine(frequency: f64, amplitude: f64, config: &Configuration, start: usize) -> Vec<f64> {
        (start..start + config.window_size)
            .map(|i| {
                amplitude * (2.0 * PI * frequency * i as f64 / config.sampling_frequency).sin()
            })
            .collect()
    }

    #[test]
    fn test_single_tone_peak_location() {
        let config = Configuration::default();
        assert_eq!(config.band_count(), 88);
        let mut builder = FeatureBuilder::new(config.clone()).unwrap();

        let frequency = 440.0;
        let target = config.band_for_frequency(frequency).unwrap();
        let data0 = sine(frequency, 0.5, &config, 0);
        let data1 = sine(frequency, 0.5, &config, config.step_size);

        let feature = builder.generate(&data0, &data1).unwrap();
        assert_eq!(feature.peak_locations.len(), 88);

        let (max_band, max_value) = feature
            .peak_locations
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(max_band, target);
        assert!(max_value > 0.9, "peak location score {max_value}");

        for (band, &value) in feature.peak_locations.iter().enumerate() {
            if band != target {
                assert!(value.abs() < 1e-6, "band {band} = {value}");
            }
        }

        assert!(feature.peak_heights[target] > 0.0);
        let spectrum_max = feature
            .spectrum
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(spectrum_max.0, target);
    }

    #[test]
    fn test_tone_between_bins_maps_to_nearest_note() {
        let config = Configuration::default();
        let mut builder = FeatureBuilder::new(config.clone()).unwrap();
        // C5, not aligned to an FFT bin
        let frequency = 523.251;
        let data0 = sine(frequency, 0.3, &config, 0);
        let data1 = sine(frequency, 0.3, &config, config.step_size);
        let feature = builder.generate(&data0, &data1).unwrap();

        let band = config.band_for_note(freq_to_note(frequency)).unwrap();
        assert_eq!(band, 72 - 21);
        assert!(feature.peak_locations[band] > 0.8);
    }

    #[test]
    fn test_silence_yields_zero_peaks() {
        let config = Configuration::default();
        let mut builder = FeatureBuilder::new(config.clone()).unwrap();
        let silence = vec![0.0; config.window_size];
        let feature = builder.generate(&silence, &silence).unwrap();

        assert!(feature.peak_heights.iter().all(|&v| v == 0.0));
        assert!(feature.peak_locations.iter().all(|&v| v == 0.0));
        assert!(feature.peak_flux.iter().all(|&v| v == 0.0));
        assert!(feature.spectrum.iter().all(|&v| v == 0.0));
        assert!(feature.spectral_flux.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_onset_produces_positive_flux() {
        let config = Configuration::default();
        let mut builder = FeatureBuilder::new(config.clone()).unwrap();
        let silence = vec![0.0; config.window_size];
        let tone = sine(440.0, 0.5, &config, 0);
        let feature = builder.generate(&silence, &tone).unwrap();

        let band = config.band_for_frequency(440.0).unwrap();
        assert!(feature.spectral_flux[band] > 0.0);
        assert!(feature.peak_flux[band] > 0.0);
    }

    #[test]
    fn test_wrong_window_length() {
        let config = Configuration::default();
        let mut builder = FeatureBuilder::new(config.clone()).unwrap();
        let short = vec![0.0; 100];
        let ok = vec![0.0; config.window_size];
        let err = builder.generate(&ok, &short).unwrap_err();
        assert!(matches!(err, FeatureError::WindowLength { actual: 100, .. }));
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let config = Configuration {
            step_size: 0,
            ..Configuration::default()
        };
        assert!(FeatureBuilder::new(config).is_err());
    }

    #[test]
    fn test_reset_restores_initial_output() {
        let config = Configuration::default();
        let tone0 = sine(330.0, 0.4, &config, 0);
        let tone1 = sine(330.0, 0.4, &config, config.step_size);

        let mut fresh = FeatureBuilder::new(config.clone()).unwrap();
        let expected = fresh.generate(&tone0, &tone1).unwrap();

        let mut used = FeatureBuilder::new(config.clone()).unwrap();
        let loud = sine(880.0, 0.9, &config, 0);
        used.generate(&loud, &loud).unwrap();
        used.reset();
        assert_eq!(used.generate(&tone0, &tone1).unwrap(), expected);
    }

    #[test]
    fn test_sample_rate_check() {
        let builder = FeatureBuilder::new(Configuration::default()).unwrap();
        assert!(builder.check_sample_rate(44100.0).is_ok());
        assert!(matches!(
            builder.check_sample_rate(48000.0),
            Err(FeatureError::SampleRate { .. })
        ));
    }
}
