//! # Photoluminescence Degradation DAQ
//!
//! Drives a timed photoluminescence-degradation experiment: a CW laser is stepped through
//! a sequence of runs at different powers while a spectrometer captures spectra at fixed
//! intervals. Every capture is trimmed to a wavelength window, background corrected and
//! reduced to a peak position and intensity; everything is exported as CSV at the end.
//!
//! ## Crate Structure
//!
//! - **`config`**: `ExperimentConfig`, loaded with figment from TOML and `PL_DAQ_`
//!   environment variables, and its validation into a `RunPlan`.
//! - **`error`**: the `DaqError` enum and the multi-violation `ConfigurationError`.
//! - **`hardware`**: `LaserControl` / `Spectrometer` capability traits, the OBIS laser
//!   driver and mock instruments.
//! - **`experiment`**: run plan, wavelength window, background calibration and the
//!   `AcquisitionEngine` scheduler with its state and event stream.
//! - **`data`**: peak extraction, the fixed-capacity result store and the CSV exporter.
//! - **`logging`**: tracing subscriber setup.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
