use crate::resample::{self, ResampleMethod, Window};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One RGBA color table entry. Components are 0..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorEntry {
    pub r: i16,
    pub g: i16,
    pub b: i16,
    pub a: i16,
}

impl ColorEntry {
    pub const TRANSPARENT: ColorEntry = ColorEntry::rgba(0, 0, 0, 0);

    pub const fn rgba(r: i16, g: i16, b: i16, a: i16) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: i16, g: i16, b: i16) -> Self {
        Self::rgba(r, g, b, 255)
    }

    fn components(&self) -> [f64; 4] {
        [self.r as f64, self.g as f64, self.b as f64, self.a as f64]
    }

    fn distance_sq(&self, rgba: &[f64; 4]) -> f64 {
        self.components()
            .iter()
            .zip(rgba)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// Ordered palette; pixel value `i` maps to entry `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTable {
    entries: Vec<ColorEntry>,
}

impl ColorTable {
    pub fn new(entries: Vec<ColorEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ColorEntry] {
        &self.entries
    }

    /// Entry for a pixel value; out-of-table indices are transparent black.
    pub fn entry(&self, index: f64) -> ColorEntry {
        if index < 0.0 || index.fract() != 0.0 {
            return ColorEntry::TRANSPARENT;
        }
        self.entries
            .get(index as usize)
            .copied()
            .unwrap_or(ColorEntry::TRANSPARENT)
    }

    /// Index of the closest entry by squared RGBA distance; lowest index wins
    /// ties.
    pub fn nearest_index(&self, rgba: &[f64; 4]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let d = entry.distance_sq(rgba);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((idx, d));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Resample a window of palette indices in RGBA space.
///
/// Each index is expanded to its color, the kernel runs on every component
/// separately, and the rounded color is mapped back to the nearest entry.
/// Nearest works on the indices directly. Returns `None` when the window
/// has no valid sample.
pub fn resample_indexed(method: ResampleMethod, window: &Window<'_>, table: &ColorTable) -> Option<f64> {
    if method == ResampleMethod::Nearest {
        return Some(resample::nearest(window));
    }

    let colors = window.samples.mapv(|index| table.entry(index));
    let mut rgba = [0.0f64; 4];
    for (component, out) in rgba.iter_mut().enumerate() {
        let plane: Array2<f64> = colors.mapv(|entry| entry.components()[component]);
        let mut plane_window = Window::new(plane.view(), window.mask.map(|m| m.reborrow()));
        if let Some((rows, cols)) = window.weights {
            plane_window = plane_window.with_weights(rows, cols);
        }
        *out = resample::apply(method, &plane_window, false)?.round();
    }

    table.nearest_index(&rgba).map(|idx| idx as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::binomial_weights;
    use ndarray::arr2;

    fn black_white_gray() -> ColorTable {
        ColorTable::new(vec![
            ColorEntry::rgb(0, 0, 0),
            ColorEntry::rgb(255, 255, 255),
            ColorEntry::rgb(127, 127, 127),
        ])
    }

    #[test]
    fn test_entry_lookup() {
        let table = black_white_gray();
        assert_eq!(table.entry(1.0), ColorEntry::rgb(255, 255, 255));
        assert_eq!(table.entry(7.0), ColorEntry::TRANSPARENT);
        assert_eq!(table.entry(-1.0), ColorEntry::TRANSPARENT);
    }

    #[test]
    fn test_nearest_index_tie_prefers_lowest() {
        let table = ColorTable::new(vec![
            ColorEntry::rgb(10, 0, 0),
            ColorEntry::rgb(0, 0, 0),
            ColorEntry::rgb(20, 0, 0),
        ]);
        assert_eq!(table.nearest_index(&[15.0, 0.0, 0.0, 255.0]), Some(0));
        assert_eq!(table.nearest_index(&[1.0, 0.0, 0.0, 255.0]), Some(1));
        assert_eq!(ColorTable::default().nearest_index(&[0.0; 4]), None);
    }

    #[test]
    fn test_checkerboard_average_is_gray() {
        let indices = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let window = Window::new(indices.view(), None);
        let table = black_white_gray();
        assert_eq!(resample_indexed(ResampleMethod::Average, &window, &table), Some(2.0));
    }

    #[test]
    fn test_checkerboard_nearest_keeps_index() {
        let indices = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let window = Window::new(indices.view(), None);
        let table = black_white_gray();
        assert_eq!(resample_indexed(ResampleMethod::Nearest, &window, &table), Some(0.0));
    }

    #[test]
    fn test_checkerboard_mode_is_white() {
        let indices = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let window = Window::new(indices.view(), None);
        let table = black_white_gray();
        assert_eq!(resample_indexed(ResampleMethod::Mode, &window, &table), Some(1.0));
    }

    #[test]
    fn test_checkerboard_gauss_is_gray() {
        let indices = arr2(&[[0.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        let weights = binomial_weights(1);
        let window = Window::new(indices.view(), None).with_weights(&weights, &weights);
        let table = black_white_gray();
        assert_eq!(resample_indexed(ResampleMethod::Gauss, &window, &table), Some(2.0));
    }

    #[test]
    fn test_all_invalid_yields_none() {
        let indices = arr2(&[[0.0, 1.0]]);
        let mask = arr2(&[[false, false]]);
        let window = Window::new(indices.view(), Some(mask.view()));
        assert_eq!(
            resample_indexed(ResampleMethod::Average, &window, &black_white_gray()),
            None
        );
    }
}
