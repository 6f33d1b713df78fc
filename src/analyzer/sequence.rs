use super::builder::FeatureBuilder;
use super::{Configuration, FeatureError, Result};
use crate::db::models::{Example, FeatureData};

/// Turns a whole decoded recording into feature records, one per window pair.
///
/// The samples are left-padded with silence so the first windows see the
/// onset arrive. Each record's `frame_offset` is the start of its first
/// window relative to the first real sample, so padded windows get negative
/// offsets.
pub struct SequenceBuilder {
    builder: FeatureBuilder,
    padding: usize,
}

impl SequenceBuilder {
    pub fn new(configuration: Configuration) -> Result<Self> {
        let padding = configuration.window_size;
        Ok(Self {
            builder: FeatureBuilder::new(configuration)?,
            padding,
        })
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn configuration(&self) -> &Configuration {
        self.builder.configuration()
    }

    /// Window `samples` and generate one record per pair.
    ///
    /// Every record copies `template`'s label and file path. Generator
    /// state is reset first, so sequences don't leak into each other.
    pub fn build(
        &mut self,
        samples: &[f64],
        sample_rate: f64,
        template: &Example,
    ) -> Result<Vec<FeatureData>> {
        self.builder.check_sample_rate(sample_rate)?;

        let band_count = self.configuration().band_count();
        if template.label.len() != band_count {
            return Err(FeatureError::LabelWidth {
                expected: band_count,
                actual: template.label.len(),
            });
        }

        let window_size = self.configuration().window_size;
        let step = self.configuration().step_size;
        let needed = window_size + step;

        let mut data = vec![0.0; self.padding];
        data.extend_from_slice(samples);
        if data.len() < needed {
            return Err(FeatureError::SequenceTooShort {
                needed,
                actual: data.len(),
            });
        }

        self.builder.reset();

        let window_count = (data.len() - window_size) / step;
        let mut records = Vec::with_capacity(window_count);
        for i in 0..window_count {
            let start = i * step;
            let end = start + window_size;
            let feature = self
                .builder
                .generate(&data[start..end], &data[start + step..end + step])?;

            let example = Example {
                file_path: template.file_path.clone(),
                frame_offset: start as i64 - self.padding as i64,
                label: template.label.clone(),
            };
            records.push(FeatureData::new(&feature, example));
        }

        log::debug!(
            "{}: {} samples, {} feature records",
            template.file_path,
            samples.len(),
            records.len()
        );
        Ok(records)
    }
}

/// One-hot label marking the band of `note`; all zeros when the note is
/// outside the band grid.
pub fn note_label(configuration: &Configuration, note: f64) -> Vec<i64> {
    let mut label = vec![0; configuration.band_count()];
    if let Some(band) = configuration.band_for_note(note) {
        label[band] = 1;
    }
    label
}
