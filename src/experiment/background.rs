//! Dark-spectrum calibration.
//!
//! One background spectrum is captured for every run position, with that run's
//! integration time, while the laser is off. Repeated integration times are captured
//! again rather than shared, so each run subtracts a reference taken with the exact same
//! command sequence.

use crate::error::{AppResult, DaqError};
use crate::experiment::axis::WavelengthAxis;
use crate::hardware::capabilities::Spectrometer;
use tracing::{debug, info, instrument};

/// Background spectra, one per run position, aligned with the trimmed axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundTable {
    rows: Vec<Vec<f64>>,
}

impl BackgroundTable {
    /// Build a table from already-trimmed rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    /// Background for run `index`
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Number of rows (equals the run count)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no background was captured
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Subtract the background of run `index` from a trimmed spectrum.
    pub fn subtract(&self, index: usize, raw: &[f64]) -> AppResult<Vec<f64>> {
        let background = self.row(index).ok_or_else(|| {
            DaqError::Processing(format!("no background captured for run {index}"))
        })?;
        if background.len() != raw.len() {
            return Err(DaqError::Processing(format!(
                "spectrum has {} pixels, background for run {index} has {}",
                raw.len(),
                background.len()
            )));
        }
        Ok(raw.iter().zip(background).map(|(r, b)| r - b).collect())
    }
}

/// Capture one background per integration time, in order.
///
/// Must run with the laser off. Hardware failures are returned immediately (no retry).
#[instrument(skip(spectrometer, axis), fields(pixels = axis.len()))]
pub async fn calibrate(
    spectrometer: &dyn Spectrometer,
    integration_times_us: &[u32],
    axis: &WavelengthAxis,
) -> AppResult<BackgroundTable> {
    info!(count = integration_times_us.len(), "Taking background spectra");

    let mut rows = Vec::with_capacity(integration_times_us.len());
    for (index, &integration_time_us) in integration_times_us.iter().enumerate() {
        spectrometer
            .set_integration_time(integration_time_us)
            .await
            .map_err(|e| DaqError::hardware("spectrometer", "set_integration_time", e))?;
        let raw = spectrometer
            .capture_intensities()
            .await
            .map_err(|e| DaqError::hardware("spectrometer", "capture_intensities", e))?;
        rows.push(axis.trim(&raw)?);
        debug!(index, integration_time_us, "Background captured");
    }

    info!("Background done");
    Ok(BackgroundTable { rows })
}
