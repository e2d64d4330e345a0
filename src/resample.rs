//! Window kernels mapping a block of source samples to one destination
//! sample, and the per-block driver that applies them.

use crate::blocks::{AxisMap, BlockBounds};
use crate::error::{OverviewError, Result};
use crate::palette::{self, ColorTable};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Widest Gaussian kernel radius used unless configured otherwise (7 taps).
pub const DEFAULT_GAUSS_MAX_RADIUS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResampleMethod {
    Nearest,
    Average,
    Gauss,
    Mode,
    /// Average of a 1-bit image with set bits counted as 255.
    AverageBit2Grayscale,
}

impl ResampleMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ResampleMethod::Nearest => "NEAREST",
            ResampleMethod::Average => "AVERAGE",
            ResampleMethod::Gauss => "GAUSS",
            ResampleMethod::Mode => "MODE",
            ResampleMethod::AverageBit2Grayscale => "AVERAGE_BIT2GRAYSCALE",
        }
    }

    /// Methods that look at more than one source sample and therefore
    /// honor nodata and go through the color table.
    pub fn is_aggregating(self) -> bool {
        !matches!(self, ResampleMethod::Nearest)
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResampleMethod {
    type Err = OverviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NEAREST" | "NEAR" => Ok(ResampleMethod::Nearest),
            "AVERAGE" | "AVG" => Ok(ResampleMethod::Average),
            "GAUSS" => Ok(ResampleMethod::Gauss),
            "MODE" => Ok(ResampleMethod::Mode),
            "AVERAGE_BIT2GRAYSCALE" => Ok(ResampleMethod::AverageBit2Grayscale),
            other => Err(OverviewError::UnsupportedCombination(format!(
                "unknown resampling method '{}'",
                other
            ))),
        }
    }
}

/// Source samples feeding one destination pixel.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub samples: ArrayView2<'a, f64>,
    /// `None` means every sample is valid.
    pub mask: Option<ArrayView2<'a, bool>>,
    /// Separable (row, column) weights, used by the Gaussian kernel only.
    pub weights: Option<(&'a [f64], &'a [f64])>,
}

impl<'a> Window<'a> {
    pub fn new(samples: ArrayView2<'a, f64>, mask: Option<ArrayView2<'a, bool>>) -> Self {
        Self {
            samples,
            mask,
            weights: None,
        }
    }

    pub fn with_weights(mut self, rows: &'a [f64], cols: &'a [f64]) -> Self {
        self.weights = Some((rows, cols));
        self
    }

    /// Valid samples in row-major scan order.
    pub fn valid(&self) -> impl Iterator<Item = f64> + use<'a, '_> {
        let mask = self.mask;
        self.samples
            .indexed_iter()
            .filter(move |(idx, _)| mask.map_or(true, |m| m[*idx]))
            .map(|(_, &v)| v)
    }
}

/// Top-left sample of the window.
pub fn nearest(window: &Window<'_>) -> f64 {
    window.samples[[0, 0]]
}

/// Mean of the valid samples; `None` when there are none.
pub fn average(window: &Window<'_>) -> Option<f64> {
    let (sum, count) = window
        .valid()
        .fold((0.0f64, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean with non-zero (set) bits expanded to 255.
pub fn average_bit2grayscale(window: &Window<'_>) -> Option<f64> {
    let (sum, count) = window.valid().fold((0.0f64, 0usize), |(sum, count), v| {
        (sum + if v != 0.0 { 255.0 } else { 0.0 }, count + 1)
    });
    (count > 0).then(|| sum / count as f64)
}

/// Weighted mean; invalid samples weigh zero and the rest are renormalized.
pub fn gauss(window: &Window<'_>) -> Option<f64> {
    let Some((rows, cols)) = window.weights else {
        return average(window);
    };

    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for ((r, c), &v) in window.samples.indexed_iter() {
        if window.mask.is_some_and(|m| !m[[r, c]]) {
            continue;
        }
        let w = rows[r] * cols[c];
        weighted += w * v;
        total += w;
    }

    (total > 0.0).then(|| weighted / total)
}

/// Most frequent valid value by exact equality.
///
/// A value takes over only when its running count strictly exceeds the
/// best count so far, so among equally frequent values the first one to
/// reach that count wins.
pub fn mode(window: &Window<'_>) -> Option<f64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    let mut best: Option<(f64, usize)> = None;

    for v in window.valid() {
        // -0.0 and 0.0 compare equal
        let key = if v == 0.0 { 0 } else { v.to_bits() };
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        let count = *count;
        if best.map_or(true, |(_, max)| count > max) {
            best = Some((v, count));
        }
    }

    best.map(|(value, _)| value)
}

/// Apply a direct-value kernel. Nearest never yields `None`.
pub fn apply(method: ResampleMethod, window: &Window<'_>, expand_bits: bool) -> Option<f64> {
    match method {
        ResampleMethod::Nearest => Some(nearest(window)),
        ResampleMethod::Average => average(window),
        ResampleMethod::AverageBit2Grayscale if expand_bits => average_bit2grayscale(window),
        ResampleMethod::AverageBit2Grayscale => average(window),
        ResampleMethod::Gauss => gauss(window),
        ResampleMethod::Mode => mode(window),
    }
}

/// Row of binomial coefficients `C(2r, k)`, the separable Gaussian
/// approximation (`1 2 1`, `1 4 6 4 1`, `1 6 15 20 15 6 1`, ...).
pub fn binomial_weights(radius: usize) -> Vec<f64> {
    let n = 2 * radius;
    let mut row = Vec::with_capacity(n + 1);
    let mut c = 1.0f64;
    for k in 0..=n {
        row.push(c);
        c = c * (n - k) as f64 / (k + 1) as f64;
    }
    row
}

/// Gaussian radius for a decimation ratio, capped at `max_radius`.
pub fn gauss_radius(ratio: f64, max_radius: usize) -> usize {
    (ratio.ceil() as usize).saturating_sub(1).min(max_radius)
}

/// Resamples one band from one level to the next, block by block.
#[derive(Debug, Clone)]
pub struct Resampler<'a> {
    method: ResampleMethod,
    x_map: AxisMap,
    y_map: AxisMap,
    palette: Option<&'a ColorTable>,
    nodata: Option<f64>,
    expand_bits: bool,
    x_weights: Vec<f64>,
    y_weights: Vec<f64>,
}

impl<'a> Resampler<'a> {
    pub fn new(
        method: ResampleMethod,
        src_size: (usize, usize),
        dst_size: (usize, usize),
        palette: Option<&'a ColorTable>,
        nodata: Option<f64>,
        gauss_max_radius: usize,
    ) -> Self {
        let x_map = AxisMap::new(src_size.0, dst_size.0);
        let y_map = AxisMap::new(src_size.1, dst_size.1);
        let (x_weights, y_weights) = if method == ResampleMethod::Gauss {
            (
                binomial_weights(gauss_radius(x_map.ratio, gauss_max_radius)),
                binomial_weights(gauss_radius(y_map.ratio, gauss_max_radius)),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Self {
            method,
            x_map,
            y_map,
            palette: palette.filter(|_| method.is_aggregating()),
            nodata,
            expand_bits: false,
            x_weights,
            y_weights,
        }
    }

    /// Expand set bits to 255; only meaningful on a 1-bit source.
    pub fn expand_bits(mut self, expand: bool) -> Self {
        self.expand_bits = expand;
        self
    }

    pub fn x_map(&self) -> &AxisMap {
        &self.x_map
    }

    pub fn y_map(&self) -> &AxisMap {
        &self.y_map
    }

    /// Extra source pixels needed around each footprint.
    pub fn radius(&self) -> (usize, usize) {
        (
            self.x_weights.len().saturating_sub(1) / 2,
            self.y_weights.len().saturating_sub(1) / 2,
        )
    }

    /// Compute destination block `dst` from `source`, whose top-left pixel
    /// sits at `origin` in source coordinates.
    pub fn resample_block(
        &self,
        source: ArrayView2<'_, f64>,
        mask: Option<ArrayView2<'_, bool>>,
        origin: (usize, usize),
        dst: &BlockBounds,
    ) -> Result<Array2<f64>> {
        let (rows, cols) = source.dim();
        let mut out = Array2::zeros((dst.height(), dst.width()));

        for dy in dst.y_min..dst.y_max {
            let (y0, y1, wy) = self.taps(&self.y_map, &self.y_weights, dy, origin.1, rows)?;
            for dx in dst.x_min..dst.x_max {
                let (x0, x1, wx) = self.taps(&self.x_map, &self.x_weights, dx, origin.0, cols)?;

                let mut window = Window::new(
                    source.reborrow().slice_move(s![y0..y1, x0..x1]),
                    mask.map(|m| m.reborrow().slice_move(s![y0..y1, x0..x1])),
                );
                if let (Some(wy), Some(wx)) = (wy, wx) {
                    window = window.with_weights(wy, wx);
                }

                let value = match self.palette {
                    Some(table) => palette::resample_indexed(self.method, &window, table),
                    None => apply(self.method, &window, self.expand_bits),
                };
                out[[dy - dst.y_min, dx - dst.x_min]] = value.or(self.nodata).unwrap_or(0.0);
            }
        }

        Ok(out)
    }

    /// Source range (relative to the loaded window) and weights for one
    /// destination index along one axis.
    fn taps<'w>(
        &self,
        map: &AxisMap,
        weights: &'w [f64],
        d: usize,
        origin: usize,
        loaded: usize,
    ) -> Result<(usize, usize, Option<&'w [f64]>)> {
        let (start, end, taps) = if weights.is_empty() {
            let (start, end) = map.span(d);
            (start, end, None)
        } else {
            let radius = weights.len() / 2;
            let center = map.center(d);
            let start = center.saturating_sub(radius);
            let end = (center + radius + 1).min(map.src_len);
            let skip = radius - (center - start);
            (start, end, Some(&weights[skip..skip + (end - start)]))
        };

        if start < origin || end - origin > loaded {
            return Err(OverviewError::Resampling(format!(
                "source pixels [{}, {}) not loaded (window starts at {}, {} pixels)",
                start, end, origin, loaded
            )));
        }
        Ok((start - origin, end - origin, taps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockGrid;
    use ndarray::arr2;

    fn window(samples: &Array2<f64>) -> Window<'_> {
        Window::new(samples.view(), None)
    }

    #[test]
    fn test_parse_method_names() {
        assert_eq!("near".parse::<ResampleMethod>().unwrap(), ResampleMethod::Nearest);
        assert_eq!("".parse::<ResampleMethod>().unwrap(), ResampleMethod::Nearest);
        assert_eq!("AVG".parse::<ResampleMethod>().unwrap(), ResampleMethod::Average);
        assert_eq!(
            "average_bit2grayscale".parse::<ResampleMethod>().unwrap(),
            ResampleMethod::AverageBit2Grayscale
        );
        assert!("cubic".parse::<ResampleMethod>().is_err());
    }

    #[test]
    fn test_nearest_is_top_left() {
        let samples = arr2(&[[3.0, 9.0], [9.0, 9.0]]);
        assert_eq!(nearest(&window(&samples)), 3.0);
    }

    #[test]
    fn test_average_excludes_invalid() {
        let samples = arr2(&[[10.0, 20.0], [0.0, 0.0]]);
        let mask = arr2(&[[true, true], [false, false]]);
        let w = Window::new(samples.view(), Some(mask.view()));
        assert_eq!(average(&w), Some(15.0));

        let none = arr2(&[[false, false], [false, false]]);
        let w = Window::new(samples.view(), Some(none.view()));
        assert_eq!(average(&w), None);
    }

    #[test]
    fn test_average_mask_without_invalid_matches_unmasked() {
        let samples = arr2(&[[1.0, 2.0], [4.0, 8.0]]);
        let mask = arr2(&[[true, true], [true, true]]);
        let masked = average(&Window::new(samples.view(), Some(mask.view())));
        assert_eq!(masked, average(&window(&samples)));
        assert_eq!(masked, Some(3.75));
    }

    #[test]
    fn test_bit2grayscale_expands_bits() {
        let samples = arr2(&[[1.0, 0.0], [1.0, 1.0]]);
        assert_eq!(average_bit2grayscale(&window(&samples)), Some(191.25));
    }

    #[test]
    fn test_mode_first_to_reach_top_count() {
        // Scan order 0, 1, 1, 0: value 1 reaches two first.
        let samples = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        assert_eq!(mode(&window(&samples)), Some(1.0));

        let samples = arr2(&[[5.0, 5.0, 2.0], [2.0, 2.0, 5.0]]);
        // 5 reaches two at index 1, 2 reaches two at index 3, 2 reaches three at 4.
        assert_eq!(mode(&window(&samples)), Some(2.0));
    }

    #[test]
    fn test_mode_exact_for_floats() {
        let samples = arr2(&[[0.25, 0.5], [0.25, 1000.75]]);
        assert_eq!(mode(&window(&samples)), Some(0.25));
    }

    #[test]
    fn test_mode_large_window_signed_zero() {
        // Values 0..=21 appear 43 times; 0 leads each cycle of 97.
        let samples = Array2::from_shape_fn((64, 64), |(r, c)| ((r * 64 + c) % 97) as f64);
        assert_eq!(mode(&window(&samples)), Some(0.0));

        // -0.0 and 0.0 share a count, so zero reaches two before 5 does.
        let samples = arr2(&[[-0.0, 5.0], [0.0, 5.0]]);
        assert_eq!(mode(&window(&samples)), Some(0.0));
    }

    #[test]
    fn test_binomial_weights() {
        assert_eq!(binomial_weights(0), vec![1.0]);
        assert_eq!(binomial_weights(1), vec![1.0, 2.0, 1.0]);
        assert_eq!(binomial_weights(2), vec![1.0, 4.0, 6.0, 4.0, 1.0]);
        assert_eq!(binomial_weights(3), vec![1.0, 6.0, 15.0, 20.0, 15.0, 6.0, 1.0]);
        assert_eq!(gauss_radius(2.0, 3), 1);
        assert_eq!(gauss_radius(8.0, 3), 3);
    }

    #[test]
    fn test_gauss_renormalizes_masked_weights() {
        let samples = arr2(&[[0.0, 0.0, 0.0], [0.0, 100.0, 50.0], [0.0, 0.0, 0.0]]);
        let rows = binomial_weights(1);
        let cols = binomial_weights(1);
        let w = Window::new(samples.view(), None).with_weights(&rows, &cols);
        // (4 * 100 + 2 * 50) / 16
        assert_eq!(gauss(&w), Some(31.25));

        let mut mask = Array2::from_elem((3, 3), false);
        mask[[1, 1]] = true;
        mask[[1, 2]] = true;
        let w = Window::new(samples.view(), Some(mask.view())).with_weights(&rows, &cols);
        // (4 * 100 + 2 * 50) / 6
        assert!((gauss(&w).unwrap() - 500.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_resample_block_average_factor_two() {
        let source = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        let resampler = Resampler::new(ResampleMethod::Average, (4, 4), (2, 2), None, None, 3);
        let dst = BlockGrid::new(2, 2, 2, 2).get_block_bounds(0);
        let out = resampler.resample_block(source.view(), None, (0, 0), &dst).unwrap();
        assert_eq!(out, arr2(&[[2.5, 4.5], [10.5, 12.5]]));
    }

    #[test]
    fn test_resample_block_odd_edge_window_is_partial() {
        let source = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let resampler = Resampler::new(ResampleMethod::Average, (3, 3), (2, 2), None, None, 3);
        let dst = BlockGrid::new(2, 2, 2, 2).get_block_bounds(0);
        let out = resampler.resample_block(source.view(), None, (0, 0), &dst).unwrap();
        // ratio 1.5: spans [0, 2) and [2, 3)
        assert_eq!(out, arr2(&[[3.0, 4.5], [7.5, 9.0]]));
    }

    #[test]
    fn test_resample_block_all_nodata_writes_nodata() {
        let source = Array2::from_elem((2, 2), 255.0);
        let mask = Array2::from_elem((2, 2), false);
        let resampler = Resampler::new(ResampleMethod::Average, (2, 2), (1, 1), None, Some(255.0), 3);
        let dst = BlockGrid::new(1, 1, 1, 1).get_block_bounds(0);
        let out = resampler
            .resample_block(source.view(), Some(mask.view()), (0, 0), &dst)
            .unwrap();
        assert_eq!(out[[0, 0]], 255.0);
    }

    #[test]
    fn test_resample_block_rejects_missing_source() {
        let source = Array2::zeros((2, 2));
        let resampler = Resampler::new(ResampleMethod::Average, (4, 4), (2, 2), None, None, 3);
        let dst = BlockGrid::new(2, 2, 2, 2).get_block_bounds(0);
        assert!(matches!(
            resampler.resample_block(source.view(), None, (0, 0), &dst),
            Err(OverviewError::Resampling(_))
        ));
    }
}
