use std::collections::HashMap;

use crate::analyzer::builder::Feature;

pub const PEAK_LOCATIONS_DATASET: &str = "peak_locations";
pub const PEAK_HEIGHTS_DATASET: &str = "peak_heights";
pub const SPECTRUM_DATASET: &str = "spectrum";
pub const SPECTRUM_FLUX_DATASET: &str = "spectrum_flux";
pub const PEAK_FLUX_FIELD: &str = "peak_flux";

pub const LABEL_DATASET: &str = "label";
pub const OFFSET_DATASET: &str = "offset";

pub const FILE_NAME_DATASET: &str = "fileName";
pub const FOLDER_DATASET: &str = "folder";

/// Double datasets, in on-disk creation order.
pub const DOUBLE_DATASETS: [&str; 4] = [
    PEAK_LOCATIONS_DATASET,
    PEAK_HEIGHTS_DATASET,
    SPECTRUM_DATASET,
    SPECTRUM_FLUX_DATASET,
];

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Double,
    Int,
    Text,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Double => "f64",
            Self::Int => "i64",
            Self::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "f64" => Some(Self::Double),
            "i64" => Some(Self::Int),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Expected shape of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub name: &'static str,
    pub kind: DatasetKind,
    /// Elements per row. String datasets hold one string per row.
    pub width: usize,
}

impl DatasetSpec {
    /// `folder` has one row per source file rather than one per example.
    pub fn is_row_granular(&self) -> bool {
        self.name != FOLDER_DATASET
    }
}

/// One chunk's worth of rows for a double dataset.
#[derive(Debug, Clone)]
pub struct DoubleTable {
    pub name: String,
    pub width: usize,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct IntTable {
    pub name: String,
    pub width: usize,
    pub data: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct StringTable {
    pub name: String,
    pub data: Vec<String>,
}

/// Ground truth for one window pair, supplied by the labelling side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Example {
    pub file_path: String,
    /// Sample offset of the first window relative to the start of the file.
    pub frame_offset: i64,
    /// Per-band label vector.
    pub label: Vec<i64>,
}

/// A feature record ready to be appended: named double vectors plus labels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureData {
    pub features: HashMap<String, Vec<f64>>,
    pub example: Example,
}

impl FeatureData {
    pub fn new(feature: &Feature, example: Example) -> Self {
        let widen = |values: &[f32]| values.iter().map(|&v| f64::from(v)).collect::<Vec<_>>();

        let features = HashMap::from([
            (SPECTRUM_DATASET.to_string(), widen(&feature.spectrum)),
            (SPECTRUM_FLUX_DATASET.to_string(), widen(&feature.spectral_flux)),
            (PEAK_HEIGHTS_DATASET.to_string(), widen(&feature.peak_heights)),
            (PEAK_LOCATIONS_DATASET.to_string(), widen(&feature.peak_locations)),
            (PEAK_FLUX_FIELD.to_string(), widen(&feature.peak_flux)),
        ]);

        Self { features, example }
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(Vec::as_slice)
    }
}

/// Encode a numeric row as a little-endian blob.
pub fn pack_doubles(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn unpack_doubles(bytes: &[u8]) -> Option<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes(b.try_into().unwrap_or([0; 8])))
            .collect(),
    )
}

pub fn pack_ints(values: &[i64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn unpack_ints(bytes: &[u8]) -> Option<Vec<i64>> {
    if bytes.len() % 8 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes(b.try_into().unwrap_or([0; 8])))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_kind_names() {
        for kind in [DatasetKind::Double, DatasetKind::Int, DatasetKind::Text] {
            assert_eq!(DatasetKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DatasetKind::parse("f32"), None);
    }

    #[test]
    fn test_pack_preserves_bits() {
        let values = [0.1, -0.0, f64::MIN_POSITIVE, 1e300, f64::NAN];
        let unpacked = unpack_doubles(&pack_doubles(&values)).unwrap();
        for (a, b) in values.iter().zip(&unpacked) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(unpack_ints(&pack_ints(&[i64::MIN, -1, 0, 7])).unwrap(), vec![i64::MIN, -1, 0, 7]);
        assert_eq!(unpack_doubles(&[0u8; 7]), None);
    }

    #[test]
    fn test_feature_data_fields() {
        let mut feature = Feature::new(3);
        feature.spectrum = vec![0.5, 1.0, 1.5];
        feature.peak_flux = vec![-1.0, 0.0, 1.0];
        let data = FeatureData::new(&feature, Example::default());

        assert_eq!(data.get(SPECTRUM_DATASET), Some(&[0.5, 1.0, 1.5][..]));
        assert_eq!(data.get(PEAK_FLUX_FIELD), Some(&[-1.0, 0.0, 1.0][..]));
        for name in DOUBLE_DATASETS {
            assert_eq!(data.get(name).map(<[f64]>::len), Some(3));
        }
        assert_eq!(data.get("mfcc"), None);
    }
}
