use super::bands::freq_to_note;
use super::{Configuration, Point};

/// Finds local spectral maxima above an RMS-derived noise floor.
#[derive(Debug, Clone)]
pub struct PeakExtractor {
    peak_floor: f64,
    min_peak_magnitude: f64,
    min_peak_separation: f64,
}

impl PeakExtractor {
    pub fn new(configuration: &Configuration) -> Self {
        Self {
            peak_floor: configuration.peak_floor,
            min_peak_magnitude: configuration.min_peak_magnitude,
            min_peak_separation: configuration.min_peak_separation,
        }
    }

    /// Magnitude a point must exceed to count as a peak for a window with
    /// the given RMS.
    pub fn threshold(&self, rms: f64) -> f64 {
        (rms * self.peak_floor).max(self.min_peak_magnitude)
    }

    /// Detect peaks in `points`, sorted by frequency.
    pub fn process(&self, points: &[Point], rms: f64) -> Vec<Point> {
        let threshold = self.threshold(rms);

        let mut candidates: Vec<Point> = Vec::new();
        for i in 1..points.len().saturating_sub(1) {
            let (left, centre, right) = (points[i - 1], points[i], points[i + 1]);
            if centre.y > threshold && centre.y > left.y && centre.y >= right.y {
                candidates.push(interpolate(left, centre, right));
            }
        }

        // Tallest first; equal heights keep the lower frequency first
        candidates.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

        let mut peaks: Vec<Point> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let note = freq_to_note(candidate.x);
            let crowded = peaks
                .iter()
                .any(|p| (freq_to_note(p.x) - note).abs() < self.min_peak_separation);
            if !crowded {
                peaks.push(candidate);
            }
        }

        peaks.sort_by(|a, b| a.x.total_cmp(&b.x));
        peaks
    }
}

/// Refine a local maximum with a parabola through its two neighbours.
fn interpolate(left: Point, centre: Point, right: Point) -> Point {
    let denom = left.y - 2.0 * centre.y + right.y;
    if denom == 0.0 {
        return centre;
    }
    let delta = 0.5 * (left.y - right.y) / denom;
    let bin_width = right.x - centre.x;
    Point::new(
        centre.x + delta * bin_width,
        centre.y - 0.25 * (left.y - right.y) * delta,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(values: &[f64]) -> Vec<Point> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Point::new(100.0 * (i + 1) as f64, v))
            .collect()
    }

    fn extractor() -> PeakExtractor {
        PeakExtractor::new(&Configuration {
            peak_floor: 0.1,
            min_peak_magnitude: 0.01,
            min_peak_separation: 0.5,
            ..Configuration::default()
        })
    }

    #[test]
    fn test_threshold_floor() {
        let e = extractor();
        assert_eq!(e.threshold(0.0), 0.01);
        assert!((e.threshold(2.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_peak_not_shifted() {
        let peaks = extractor().process(&points(&[0.0, 0.5, 1.0, 0.5, 0.0]), 1.0);
        assert_eq!(peaks, vec![Point::new(300.0, 1.0)]);
    }

    #[test]
    fn test_below_threshold_ignored() {
        let peaks = extractor().process(&points(&[0.0, 0.05, 0.0, 0.5, 0.0]), 1.0);
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].x - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolation_leans_toward_taller_neighbour() {
        let peaks = extractor().process(&points(&[0.0, 0.2, 1.0, 0.8, 0.0]), 1.0);
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].x > 300.0 && peaks[0].x < 350.0);
        assert!(peaks[0].y >= 1.0);
    }

    #[test]
    fn test_separation_keeps_taller() {
        // 1950 Hz and 2010 Hz are about half a semitone apart
        let mut pts = vec![Point::new(1900.0, 0.0)];
        pts.push(Point::new(1950.0, 0.3));
        pts.push(Point::new(2000.0, 0.1));
        pts.push(Point::new(2010.0, 0.9));
        pts.push(Point::new(2020.0, 0.0));
        let e = PeakExtractor::new(&Configuration {
            peak_floor: 0.0,
            min_peak_magnitude: 0.01,
            min_peak_separation: 1.0,
            ..Configuration::default()
        });
        let peaks = e.process(&pts, 1.0);
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].y >= 0.9);
    }

    #[test]
    fn test_sorted_by_frequency() {
        let peaks = extractor().process(&points(&[0.0, 0.4, 0.0, 0.0, 0.9, 0.0, 0.0, 0.6, 0.0]), 1.0);
        let xs: Vec<f64> = peaks.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![200.0, 500.0, 800.0]);
    }

    #[test]
    fn test_empty_and_short_input() {
        assert!(extractor().process(&[], 1.0).is_empty());
        assert!(extractor().process(&points(&[1.0, 2.0]), 1.0).is_empty());
    }
}
