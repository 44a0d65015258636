//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors an experiment can run into, from configuration mistakes to
//! instrument communication failures.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Pre-flight validation failures of the run plan. Carries every
//!   violated constraint at once (see [`ConfigurationError`]) so a single report lists
//!   all mistakes. Raised before any hardware is touched.
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the configuration sources.
//! - **`Hardware`**: Any failure to talk to the laser or the spectrometer. Never retried;
//!   the acquisition loop turns the laser off before surfacing it.
//! - **`Processing`**: Errors in numeric processing (empty spectra, misaligned axes).
//! - **`ShutdownFailed`**: The safety laser-off after an abort failed too. Carries the
//!   original error and the shutdown error; the laser state is unknown.
//! - **`Io`** / **`Csv`**: Export failures.
//! - **`FeatureNotEnabled`**: The configuration asks for a driver that was not compiled
//!   in or does not exist.
//!
//! Drivers and capability traits speak `anyhow::Result`; the engine converts those into
//! `DaqError::Hardware` with the device and operation attached.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Boxed error source for hardware failures coming out of `anyhow`-based drivers.
pub type HardwareSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Primary error type of the crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Run plan or experiment settings failed validation.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Configuration sources could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Communication with an instrument failed.
    #[error("Hardware communication error on {device} during {operation}: {source}")]
    Hardware {
        /// Device that failed (`laser` or `spectrometer`).
        device: &'static str,
        /// Operation in flight when the failure happened.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: HardwareSource,
    },

    /// Numeric processing failed.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// I/O error while exporting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error while exporting.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The requested driver or backend is unavailable.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// The safety shutdown after an abort failed as well.
    #[error("Shutdown failed with errors: {}", join_errors(.0))]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Wrap a driver error as a hardware communication error.
    pub fn hardware(device: &'static str, operation: &'static str, err: anyhow::Error) -> Self {
        DaqError::Hardware {
            device,
            operation,
            source: err.into(),
        }
    }

    /// Whether this error came from instrument communication.
    pub fn is_hardware(&self) -> bool {
        matches!(self, DaqError::Hardware { .. })
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

fn join_errors(errors: &[DaqError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// One violated configuration constraint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigViolation {
    /// A parallel per-run array does not have the expected length.
    #[error("`{field}` has length {actual}, expected {expected}")]
    LengthMismatch {
        /// Offending configuration key.
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Configured length.
        actual: usize,
    },

    /// The plan has no runs at all.
    #[error("no runs configured (`power_mw` is empty)")]
    EmptyPlan,

    /// A single entry is out of its valid domain.
    #[error("`{field}[{index}]` = {value}: {reason}")]
    InvalidValue {
        /// Offending configuration key.
        field: &'static str,
        /// Position in the array.
        index: usize,
        /// Rendered value.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A scalar setting is out of its valid domain.
    #[error("`{field}` = {value}: {reason}")]
    InvalidSetting {
        /// Offending configuration key.
        field: &'static str,
        /// Rendered value.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// All configuration violations found in one validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationError {
    /// Every violated constraint, in check order.
    pub violations: Vec<ConfigViolation>,
}

impl ConfigurationError {
    /// Convert a list of violations into a result: empty means valid.
    pub fn check(violations: Vec<ConfigViolation>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self { violations })
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Configuration validation error ({} problem{}): ",
            self.violations.len(),
            if self.violations.len() == 1 { "" } else { "s" }
        )?;
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigurationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_every_violation() {
        let err = ConfigurationError {
            violations: vec![
                ConfigViolation::LengthMismatch {
                    field: "step_count",
                    expected: 2,
                    actual: 3,
                },
                ConfigViolation::LengthMismatch {
                    field: "inter_run_delay_s",
                    expected: 1,
                    actual: 0,
                },
            ],
        };
        let text = DaqError::from(err).to_string();
        assert!(text.contains("2 problems"));
        assert!(text.contains("`step_count` has length 3, expected 2"));
        assert!(text.contains("`inter_run_delay_s` has length 0, expected 1"));
    }

    #[test]
    fn test_hardware_error_display() {
        let err = DaqError::hardware("laser", "turn_on", anyhow::anyhow!("port closed"));
        assert!(err.is_hardware());
        assert_eq!(
            err.to_string(),
            "Hardware communication error on laser during turn_on: port closed"
        );
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::hardware("spectrometer", "capture", anyhow::anyhow!("usb timeout")),
            DaqError::hardware("laser", "turn_off", anyhow::anyhow!("no echo")),
        ]);
        let text = err.to_string();
        assert!(text.contains("Shutdown failed"));
        assert!(text.contains("usb timeout"));
        assert!(text.contains("no echo"));
    }

    #[test]
    fn test_check_empty_is_ok() {
        assert!(ConfigurationError::check(Vec::new()).is_ok());
    }
}
