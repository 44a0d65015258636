//! Wavelength axis trimmed to the configured window.

use crate::error::{AppResult, ConfigViolation, ConfigurationError, DaqError};
use std::ops::Range;

/// Device wavelength axis restricted to `[start, finish)`.
///
/// Bounds are located with a left insertion search on the (ascending) device axis: the
/// first kept index is the first wavelength `>= start`, the first dropped index is the
/// first wavelength `>= finish`. The same index range trims every spectrum the device
/// returns, so trimmed spectra stay aligned with [`WavelengthAxis::wavelengths`].
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthAxis {
    wavelengths: Vec<f64>,
    range: Range<usize>,
    device_len: usize,
}

impl WavelengthAxis {
    /// Trim a device axis to the window.
    ///
    /// Fails with a configuration error when the window keeps no pixel.
    pub fn from_device_axis(device_axis: &[f64], start_nm: f64, finish_nm: f64) -> AppResult<Self> {
        let lower = search_sorted(device_axis, start_nm);
        let upper = search_sorted(device_axis, finish_nm).max(lower);

        if lower == upper {
            return Err(ConfigurationError {
                violations: vec![ConfigViolation::InvalidSetting {
                    field: "window",
                    value: format!("[{start_nm}, {finish_nm})"),
                    reason: "window contains no spectrometer pixel",
                }],
            }
            .into());
        }

        Ok(Self {
            wavelengths: device_axis[lower..upper].to_vec(),
            range: lower..upper,
            device_len: device_axis.len(),
        })
    }

    /// Trimmed wavelengths in nanometers
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Number of pixels kept
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    /// True when no pixel is kept (never for a constructed axis)
    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    /// Kept index range on the device axis
    pub fn index_range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Trim a full-length device spectrum to the window.
    pub fn trim(&self, spectrum: &[f64]) -> AppResult<Vec<f64>> {
        if spectrum.len() != self.device_len {
            return Err(DaqError::Processing(format!(
                "spectrum has {} pixels, device axis has {}",
                spectrum.len(),
                self.device_len
            )));
        }
        Ok(spectrum[self.range.clone()].to_vec())
    }
}

/// Index of the first element `>= value` in an ascending slice.
fn search_sorted(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&w| w < value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_axis() -> Vec<f64> {
        (0..=10).map(|i| 400.0 + 50.0 * i as f64).collect()
    }

    #[test]
    fn test_window_trims_to_nearest_in_range_indices() {
        let axis = WavelengthAxis::from_device_axis(&device_axis(), 480.0, 820.0).unwrap();
        assert_eq!(
            axis.wavelengths(),
            &[500.0, 550.0, 600.0, 650.0, 700.0, 750.0, 800.0]
        );
        assert_eq!(axis.index_range(), 2..9);
    }

    #[test]
    fn test_exact_bounds_are_inclusive_lower_exclusive_upper() {
        let axis = WavelengthAxis::from_device_axis(&device_axis(), 500.0, 800.0).unwrap();
        assert_eq!(axis.wavelengths().first(), Some(&500.0));
        assert_eq!(axis.wavelengths().last(), Some(&750.0));
    }

    #[test]
    fn test_trim_spectrum_uses_same_range() {
        let axis = WavelengthAxis::from_device_axis(&device_axis(), 480.0, 820.0).unwrap();
        let spectrum: Vec<f64> = (0..11).map(f64::from).collect();
        assert_eq!(
            axis.trim(&spectrum).unwrap(),
            vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_trim_rejects_wrong_length() {
        let axis = WavelengthAxis::from_device_axis(&device_axis(), 480.0, 820.0).unwrap();
        assert!(matches!(
            axis.trim(&[1.0, 2.0]),
            Err(DaqError::Processing(_))
        ));
    }

    #[test]
    fn test_window_outside_axis_is_configuration_error() {
        let err = WavelengthAxis::from_device_axis(&device_axis(), 950.0, 1000.0).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }
}
