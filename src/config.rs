//! Experiment configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `PL_DAQ_`, nested keys separated by `__`
//!    (e.g. `PL_DAQ_LASER__PORT=/dev/ttyUSB1`)
//!
//! The loaded [`ExperimentConfig`] is immutable and is handed to the acquisition engine
//! by value. Semantic validation happens in [`ExperimentConfig::run_plan`], which reports
//! every violated constraint at once.
//!
//! # Example
//! ```no_run
//! use pl_daq::config::ExperimentConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExperimentConfig::load_from("config/experiment.toml")?;
//! let plan = config.run_plan()?;
//! println!("{} runs", plan.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, ConfigViolation, ConfigurationError};
use crate::experiment::plan::{ParallelRunArrays, RunPlan};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level experiment configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Per-run parallel arrays
    #[serde(default)]
    pub runs: RunsConfig,
    /// Wavelength window kept from every spectrum
    #[serde(default)]
    pub window: WindowConfig,
    /// Laser controller connection
    #[serde(default)]
    pub laser: LaserConfig,
    /// Spectrometer selection
    #[serde(default)]
    pub spectrometer: SpectrometerConfig,
    /// Peak extraction parameters
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Export destination
    #[serde(default)]
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Parallel per-run configuration arrays.
///
/// The first four arrays must share one length (the run count); the inter-run delay
/// array has one entry fewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    /// Laser power per run in milliwatts
    pub power_mw: Vec<f64>,
    /// Spectrometer integration time per run in microseconds
    pub integration_time_us: Vec<u32>,
    /// Number of captures per run
    pub step_count: Vec<usize>,
    /// Pause between captures, per run, in seconds
    pub step_delay_s: Vec<f64>,
    /// Pause between consecutive runs in seconds
    #[serde(default)]
    pub inter_run_delay_s: Vec<f64>,
}

/// Wavelength window in nanometers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Inclusive lower bound
    pub start_nm: f64,
    /// Exclusive upper bound
    pub finish_nm: f64,
}

/// Supported laser drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaserDriver {
    /// Coherent OBIS over a serial port
    Obis,
    /// Simulated laser
    Mock,
}

/// Laser controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserConfig {
    /// Driver selection
    #[serde(default = "default_laser_driver")]
    pub driver: LaserDriver,
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM6")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause after every state, mode or power command, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Supported spectrometer drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrometerDriver {
    /// Simulated spectrometer
    Mock,
}

/// Spectrometer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrometerConfig {
    /// Driver selection
    #[serde(default = "default_spectrometer_driver")]
    pub driver: SpectrometerDriver,
}

/// Peak extraction parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Median filter window (odd)
    #[serde(default = "default_median_window")]
    pub median_window: usize,
    /// Gaussian smoothing sigma in samples
    #[serde(default = "default_gaussian_sigma")]
    pub gaussian_sigma: f64,
    /// Gaussian kernel radius in units of sigma
    #[serde(default = "default_gaussian_truncate")]
    pub gaussian_truncate: f64,
}

/// Export destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Parent directory for experiment folders
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    /// Experiment folder name; a timestamped name is generated when empty
    #[serde(default)]
    pub folder_name: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_laser_driver() -> LaserDriver {
    LaserDriver::Obis
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_settle_delay_ms() -> u64 {
    50
}

fn default_spectrometer_driver() -> SpectrometerDriver {
    SpectrometerDriver::Mock
}

fn default_median_window() -> usize {
    3
}

fn default_gaussian_sigma() -> f64 {
    5.0
}

fn default_gaussian_truncate() -> f64 {
    4.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            power_mw: vec![1.0, 20.0],
            integration_time_us: vec![500_000, 100_000],
            step_count: vec![120, 120],
            step_delay_s: vec![4.5, 4.9],
            inter_run_delay_s: vec![0.0],
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start_nm: 480.0,
            finish_nm: 820.0,
        }
    }
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            driver: default_laser_driver(),
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            driver: default_spectrometer_driver(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            median_window: default_median_window(),
            gaussian_sigma: default_gaussian_sigma(),
            gaussian_truncate: default_gaussian_truncate(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            folder_name: String::new(),
        }
    }
}

impl ExperimentConfig {
    /// Load configuration from a TOML file and `PL_DAQ_` environment variables
    ///
    /// Missing keys fall back to the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(ExperimentConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PL_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(ExperimentConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        Ok(config)
    }

    /// Validate every setting and build the run plan.
    ///
    /// All violations (array lengths, per-run values, window, processing, logging) are
    /// collected before failing.
    pub fn run_plan(&self) -> Result<RunPlan, ConfigurationError> {
        let mut violations = self.settings_violations();
        let arrays = ParallelRunArrays {
            power_mw: &self.runs.power_mw,
            integration_time_us: &self.runs.integration_time_us,
            step_count: &self.runs.step_count,
            step_delay_s: &self.runs.step_delay_s,
            inter_run_delay_s: &self.runs.inter_run_delay_s,
        };
        match RunPlan::from_parallel(arrays) {
            Ok(plan) if violations.is_empty() => Ok(plan),
            Ok(_) => Err(ConfigurationError { violations }),
            Err(plan_err) => {
                let mut all = plan_err.violations;
                all.append(&mut violations);
                Err(ConfigurationError { violations: all })
            }
        }
    }

    fn settings_violations(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            violations.push(ConfigViolation::InvalidSetting {
                field: "application.log_level",
                value: self.application.log_level.clone(),
                reason: "must be one of trace, debug, info, warn, error",
            });
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            violations.push(ConfigViolation::InvalidSetting {
                field: "application.log_format",
                value: self.application.log_format.clone(),
                reason: "must be one of pretty, compact, json",
            });
        }

        let window = self.window;
        if !(window.start_nm.is_finite() && window.finish_nm.is_finite())
            || window.start_nm >= window.finish_nm
        {
            violations.push(ConfigViolation::InvalidSetting {
                field: "window",
                value: format!("[{}, {})", window.start_nm, window.finish_nm),
                reason: "start_nm must be finite and below finish_nm",
            });
        }

        let processing = self.processing;
        if processing.median_window == 0 || processing.median_window % 2 == 0 {
            violations.push(ConfigViolation::InvalidSetting {
                field: "processing.median_window",
                value: processing.median_window.to_string(),
                reason: "must be odd and at least 1",
            });
        }
        if !(processing.gaussian_sigma.is_finite() && processing.gaussian_sigma > 0.0) {
            violations.push(ConfigViolation::InvalidSetting {
                field: "processing.gaussian_sigma",
                value: processing.gaussian_sigma.to_string(),
                reason: "must be positive",
            });
        }
        if !(processing.gaussian_truncate.is_finite() && processing.gaussian_truncate > 0.0) {
            violations.push(ConfigViolation::InvalidSetting {
                field: "processing.gaussian_truncate",
                value: processing.gaussian_truncate.to_string(),
                reason: "must be positive",
            });
        }

        violations
    }

    /// Settle delay after laser commands
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.laser.settle_delay_ms)
    }
}
