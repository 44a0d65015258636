//! Peak extraction from background-corrected spectra.
//!
//! Each capture is smoothed with a short median filter (kills single-pixel spikes from
//! cosmic rays and hot pixels) followed by a Gaussian filter, and the peak is the
//! leftmost maximum of the smoothed curve. Both filters extend the signal at the edges by
//! half-sample symmetric reflection (`d c b a | a b c d | d c b a`), so the output has
//! the input length and no zero-padding artifacts near the window bounds.

use crate::config::ProcessingConfig;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Position and height of the photoluminescence peak in one capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakFeature {
    /// Wavelength of the maximum, in nm (taken from the unsmoothed axis)
    pub wavelength: f64,
    /// Smoothed intensity at the maximum
    pub intensity: f64,
}

/// Median + Gaussian smoothing followed by a leftmost argmax.
#[derive(Debug, Clone)]
pub struct PeakExtractor {
    median_window: usize,
    kernel: Vec<f64>,
}

impl PeakExtractor {
    /// Build an extractor.
    ///
    /// `median_window` should be odd; `sigma` and `truncate` must be positive. The
    /// Gaussian kernel radius is `round(truncate * sigma)`.
    pub fn new(median_window: usize, sigma: f64, truncate: f64) -> Self {
        Self {
            median_window: median_window.max(1),
            kernel: gaussian_kernel(sigma, truncate),
        }
    }

    /// Extractor with the configured smoothing parameters.
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(
            config.median_window,
            config.gaussian_sigma,
            config.gaussian_truncate,
        )
    }

    /// Normalized Gaussian weights, length `2 * radius + 1`
    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    /// Smoothed copy of `spectrum` (same length).
    pub fn smooth(&self, spectrum: &[f64]) -> Vec<f64> {
        let despiked = median_filter(spectrum, self.median_window);
        correlate_reflect(&despiked, &self.kernel)
    }

    /// Locate the peak of `spectrum` on `wavelengths`.
    ///
    /// Fails when the spectrum is empty or not aligned with the axis.
    pub fn extract_peak(&self, spectrum: &[f64], wavelengths: &[f64]) -> AppResult<PeakFeature> {
        if spectrum.is_empty() {
            return Err(DaqError::Processing(
                "cannot extract a peak from an empty spectrum".to_string(),
            ));
        }
        if spectrum.len() != wavelengths.len() {
            return Err(DaqError::Processing(format!(
                "spectrum has {} points but the wavelength axis has {}",
                spectrum.len(),
                wavelengths.len()
            )));
        }

        let smoothed = self.smooth(spectrum);
        let index = leftmost_argmax(&smoothed);
        Ok(PeakFeature {
            wavelength: wavelengths[index],
            intensity: smoothed[index],
        })
    }
}

impl Default for PeakExtractor {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// Map a possibly out-of-range index onto `0..len` by half-sample symmetric reflection.
fn reflect_index(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let folded = index.rem_euclid(period);
    if folded >= len {
        (period - 1 - folded) as usize
    } else {
        folded as usize
    }
}

/// Running median over `window` samples centered on each point.
pub fn median_filter(data: &[f64], window: usize) -> Vec<f64> {
    if data.is_empty() || window <= 1 {
        return data.to_vec();
    }
    // origin 0: for even windows the extra sample sits on the left
    let left = (window / 2) as isize;
    let mut scratch = vec![0.0; window];
    (0..data.len() as isize)
        .map(|i| {
            for (k, slot) in scratch.iter_mut().enumerate() {
                *slot = data[reflect_index(i - left + k as isize, data.len())];
            }
            let mid = window / 2;
            let (_, median, _) = scratch.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            *median
        })
        .collect()
}

/// Gaussian filter with the given `sigma`, kernel truncated at `truncate * sigma`.
pub fn gaussian_filter1d(data: &[f64], sigma: f64, truncate: f64) -> Vec<f64> {
    correlate_reflect(data, &gaussian_kernel(sigma, truncate))
}

fn gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    let radius = (truncate * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

fn correlate_reflect(data: &[f64], kernel: &[f64]) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let radius = (kernel.len() / 2) as isize;
    (0..data.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * data[reflect_index(i + k as isize - radius, data.len())])
                .sum()
        })
        .collect()
}

/// Index of the first maximum. A NaN counts as the maximum, so the first NaN wins.
fn leftmost_argmax(values: &[f64]) -> usize {
    if let Some(nan) = values.iter().position(|v| v.is_nan()) {
        return nan;
    }
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
