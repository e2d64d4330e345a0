use ndarray::{Array2, ArrayView2, Zip};

/// How nodata declarations combine across the bands of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskPolicy {
    /// Each band is masked by its own nodata value, independently.
    PerBand,
    /// Dataset-wide `NODATA_VALUES`: a pixel is nodata for every band only
    /// when all bands hold their respective value at once.
    AllBands(Vec<f64>),
}

/// Exact nodata test. A NaN nodata value matches NaN samples.
#[inline]
pub fn is_nodata(nodata: f64, value: f64) -> bool {
    value == nodata || (nodata.is_nan() && value.is_nan())
}

#[inline]
pub fn is_valid(nodata: Option<f64>, value: f64) -> bool {
    match nodata {
        Some(nd) => !is_nodata(nd, value),
        None => true,
    }
}

/// Parse a whitespace-separated `NODATA_VALUES` item, one value per band.
/// Returns `None` if any token is not a number.
pub fn parse_nodata_values(text: &str) -> Option<Vec<f64>> {
    text.split_whitespace().map(|token| token.parse::<f64>().ok()).collect()
}

/// Per-pixel validity of a source window; `true` means usable.
pub type ValidityMask = Array2<bool>;

/// Validity of one band's window under its own nodata value.
///
/// Returns `None` when every sample is valid so kernels can skip masking.
pub fn band_mask(window: ArrayView2<'_, f64>, nodata: Option<f64>) -> Option<ValidityMask> {
    let nd = nodata?;
    let mask = window.mapv(|v| !is_nodata(nd, v));
    if mask.iter().all(|&valid| valid) {
        None
    } else {
        Some(mask)
    }
}

/// Shared validity of a multi-band window under `NODATA_VALUES`.
pub fn all_bands_mask(windows: &[Array2<f64>], nodata_values: &[f64]) -> Option<ValidityMask> {
    let first = windows.first()?;
    let mut mask = ValidityMask::from_elem(first.dim(), false);

    for (window, &nd) in windows.iter().zip(nodata_values) {
        Zip::from(&mut mask).and(window).for_each(|valid, &v| {
            if !is_nodata(nd, v) {
                *valid = true;
            }
        });
    }

    if mask.iter().all(|&valid| valid) {
        None
    } else {
        Some(mask)
    }
}

impl MaskPolicy {
    /// Evaluate validity masks for every band window of one block.
    pub fn evaluate(&self, windows: &[Array2<f64>], nodata: &[Option<f64>]) -> Vec<Option<ValidityMask>> {
        match self {
            MaskPolicy::PerBand => windows
                .iter()
                .zip(nodata)
                .map(|(window, &nd)| band_mask(window.view(), nd))
                .collect(),
            MaskPolicy::AllBands(values) => {
                let shared = all_bands_mask(windows, values);
                vec![shared; windows.len()]
            }
        }
    }

    /// Value written where a destination pixel has no valid source.
    pub fn nodata_for_band(&self, band_idx: usize, band_nodata: Option<f64>) -> Option<f64> {
        match self {
            MaskPolicy::PerBand => band_nodata,
            MaskPolicy::AllBands(values) => values.get(band_idx).copied().or(band_nodata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_parse_nodata_values() {
        assert_eq!(parse_nodata_values("0 0  255\n"), Some(vec![0.0, 0.0, 255.0]));
        assert_eq!(parse_nodata_values("-1.5 1e3"), Some(vec![-1.5, 1000.0]));
        assert!(parse_nodata_values("nan")
            .map_or(false, |values| values.len() == 1 && values[0].is_nan()));
        assert_eq!(parse_nodata_values("0 zero"), None);
        assert_eq!(parse_nodata_values(""), Some(vec![]));
    }

    #[test]
    fn test_exact_compare() {
        assert!(!is_valid(Some(0.0), 0.0));
        assert!(is_valid(Some(0.0), 1e-12));
        assert!(!is_valid(Some(f64::NAN), f64::NAN));
        assert!(is_valid(None, f64::NAN));
    }

    #[test]
    fn test_band_mask_none_when_clean() {
        let window = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        assert!(band_mask(window.view(), Some(0.0)).is_none());
        assert!(band_mask(window.view(), None).is_none());

        let mask = band_mask(window.view(), Some(4.0)).unwrap();
        assert_eq!(mask, arr2(&[[true, true], [true, false]]));
    }

    #[test]
    fn test_all_bands_requires_every_band() {
        let red = arr2(&[[0.0, 0.0], [5.0, 0.0]]);
        let green = arr2(&[[0.0, 9.0], [0.0, 0.0]]);
        let mask = all_bands_mask(&[red, green], &[0.0, 0.0]).unwrap();
        // Only pixel (1, 1) is zero in both bands.
        assert_eq!(mask, arr2(&[[false, true], [true, false]]));
    }

    #[test]
    fn test_policy_evaluate_per_band_is_independent() {
        let a = arr2(&[[1.0, 2.0]]);
        let b = arr2(&[[1.0, 2.0]]);
        let masks = MaskPolicy::PerBand.evaluate(&[a, b], &[Some(1.0), Some(2.0)]);
        assert_eq!(masks[0].as_ref().unwrap(), &arr2(&[[false, true]]));
        assert_eq!(masks[1].as_ref().unwrap(), &arr2(&[[true, false]]));
    }

    #[test]
    fn test_nodata_for_band() {
        let policy = MaskPolicy::AllBands(vec![1.0, 2.0, 3.0]);
        assert_eq!(policy.nodata_for_band(1, None), Some(2.0));
        assert_eq!(MaskPolicy::PerBand.nodata_for_band(1, Some(9.0)), Some(9.0));
    }
}
