//! Mapping between frequencies, MIDI notes and the fixed band grid.

use super::Configuration;

/// Frequency of MIDI note 69 (A4).
const A4_FREQUENCY: f64 = 440.0;
const A4_NOTE: f64 = 69.0;

/// Convert a frequency in Hz to a (fractional) MIDI note number.
pub fn freq_to_note(frequency: f64) -> f64 {
    A4_NOTE + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Convert a (fractional) MIDI note number to a frequency in Hz.
pub fn note_to_freq(note: f64) -> f64 {
    A4_FREQUENCY * 2f64.powf((note - A4_NOTE) / 12.0)
}

impl Configuration {
    /// Band whose centre note is closest to `note`, or `None` when the note
    /// falls outside the grid.
    pub fn band_for_note(&self, note: f64) -> Option<usize> {
        let band = ((note - f64::from(self.lowest_note)) / self.band_size).round();
        if band.is_finite() && band >= 0.0 && band < self.band_count() as f64 {
            Some(band as usize)
        } else {
            None
        }
    }

    /// Centre note of a band.
    pub fn note_for_band(&self, band: usize) -> f64 {
        f64::from(self.lowest_note) + band as f64 * self.band_size
    }

    /// Band for a frequency in Hz. Non-positive frequencies map to no band.
    pub fn band_for_frequency(&self, frequency: f64) -> Option<usize> {
        if frequency <= 0.0 {
            return None;
        }
        self.band_for_note(freq_to_note(frequency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_frequency_conversion() {
        assert!((freq_to_note(440.0) - 69.0).abs() < 1e-12);
        assert!((freq_to_note(880.0) - 81.0).abs() < 1e-12);
        assert!((note_to_freq(60.0) - 261.625_565_300_598_6).abs() < 1e-9);
        for note in [21.0, 45.5, 69.0, 108.0] {
            assert!((freq_to_note(note_to_freq(note)) - note).abs() < 1e-9);
        }
    }

    #[test]
    fn test_band_round_trip() {
        for band_size in [1.0, 0.5, 2.0] {
            let config = Configuration {
                band_size,
                ..Configuration::default()
            };
            for band in 0..config.band_count() {
                assert_eq!(config.band_for_note(config.note_for_band(band)), Some(band));
            }
        }
    }

    #[test]
    fn test_band_out_of_range() {
        let config = Configuration::default();
        assert_eq!(config.band_for_note(10.0), None);
        assert_eq!(config.band_for_note(20.4), None);
        assert_eq!(config.band_for_note(20.6), Some(0));
        assert_eq!(config.band_for_note(108.4), Some(87));
        assert_eq!(config.band_for_note(108.6), None);
        assert_eq!(config.band_for_note(f64::NAN), None);
        assert_eq!(config.band_for_frequency(0.0), None);
    }

    #[test]
    fn test_band_mapping_is_monotonic() {
        let config = Configuration::default();
        let mut previous = 0;
        let mut note = 20.6;
        while note < 108.4 {
            let band = config.band_for_note(note).unwrap();
            assert!(band >= previous);
            previous = band;
            note += 0.1;
        }
    }

    #[test]
    fn test_a4_band() {
        let config = Configuration::default();
        assert_eq!(config.band_for_frequency(440.0), Some(48));
    }
}
