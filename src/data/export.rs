//! CSV export of a finished experiment.
//!
//! One folder per experiment containing:
//!
//! | file | content |
//! |------|---------|
//! | `run <n>.csv` | wavelength column, then one column per captured step of run `n` |
//! | `times.csv` | one column per run, one row per step, zero padded |
//! | `max_intensity_and_wavelength.csv` | peak wavelengths of every run, then peak intensities of every run; one row per step, zero padded |
//! | `config.txt` | human-readable run parameters |
//! | `config.toml` | snapshot of the effective configuration |
//!
//! Numbers are written with three decimals.

use crate::config::{ExperimentConfig, OutputConfig};
use crate::error::{AppResult, DaqError};
use crate::experiment::run_engine::ExperimentResults;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

#[cfg(feature = "storage_csv")]
use std::fs::File;
#[cfg(feature = "storage_csv")]
use std::io::Write;

/// Name of the per-run times table
pub const TIMES_FILE: &str = "times.csv";
/// Name of the peak table
pub const PEAKS_FILE: &str = "max_intensity_and_wavelength.csv";
/// Name of the text summary
pub const SUMMARY_FILE: &str = "config.txt";
/// Name of the configuration snapshot
pub const CONFIG_SNAPSHOT_FILE: &str = "config.toml";

/// File name of the spectra table of run `index` (0-based)
pub fn run_file_name(index: usize) -> String {
    format!("run {}.csv", index + 1)
}

/// Writes experiment results as CSV files into one folder.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    folder: PathBuf,
}

impl CsvExporter {
    /// Export into `folder` (created on export).
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Export into `<directory>/<folder_name>`, or a timestamped folder when no name is
    /// configured.
    pub fn for_experiment(output: &OutputConfig, started_at: DateTime<Local>) -> Self {
        let name = if output.folder_name.trim().is_empty() {
            format!("pl_{}", started_at.format("%Y%m%d_%H%M%S"))
        } else {
            output.folder_name.clone()
        };
        Self::new(output.directory.join(name))
    }

    /// Target folder
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Write every artifact and return the written paths.
    pub fn export(
        &self,
        results: &ExperimentResults,
        config: &ExperimentConfig,
    ) -> AppResult<Vec<PathBuf>> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (results, config);
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        #[cfg(feature = "storage_csv")]
        {
            std::fs::create_dir_all(&self.folder)?;

            let mut written = Vec::new();
            for run in 0..results.store.run_count() {
                written.push(self.write_run(results, run)?);
            }
            written.push(self.write_times(results)?);
            written.push(self.write_peaks(results)?);
            written.push(self.write_summary(results)?);
            written.push(self.write_config_snapshot(config)?);

            info!(
                folder = %self.folder.display(),
                files = written.len(),
                "Results exported"
            );
            Ok(written)
        }
    }

    #[cfg(feature = "storage_csv")]
    fn write_run(&self, results: &ExperimentResults, run: usize) -> AppResult<PathBuf> {
        let path = self.folder.join(run_file_name(run));
        let store = &results.store;
        let spectra: Vec<&[f64]> = store.run_spectra(run).collect();

        let mut writer = csv::Writer::from_path(&path)?;
        let mut header = vec!["wavelengths".to_string()];
        header.extend((1..=spectra.len()).map(|step| format!("step {step}")));
        writer.write_record(&header)?;

        for (pixel, wavelength) in results.axis.wavelengths().iter().enumerate() {
            let mut record = vec![fmt3(*wavelength)];
            record.extend(spectra.iter().map(|spectrum| fmt3(spectrum[pixel])));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(path)
    }

    #[cfg(feature = "storage_csv")]
    fn write_times(&self, results: &ExperimentResults) -> AppResult<PathBuf> {
        let path = self.folder.join(TIMES_FILE);
        let store = &results.store;
        let runs = store.run_count();

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record((1..=runs).map(|run| format!("times for run {run}")))?;
        for step in 0..store.max_steps() {
            writer.write_record((0..runs).map(|run| fmt3(store.times(run)[step])))?;
        }
        writer.flush()?;
        Ok(path)
    }

    #[cfg(feature = "storage_csv")]
    fn write_peaks(&self, results: &ExperimentResults) -> AppResult<PathBuf> {
        let path = self.folder.join(PEAKS_FILE);
        let store = &results.store;
        let runs = store.run_count();

        let mut writer = csv::Writer::from_path(&path)?;
        let header = (1..=runs)
            .map(|run| format!("max wavelength run {run}"))
            .chain((1..=runs).map(|run| format!("max intensity run {run}")));
        writer.write_record(header)?;

        for step in 0..store.max_steps() {
            let wavelengths = (0..runs).map(|run| fmt3(store.peaks(run)[step].wavelength));
            let intensities = (0..runs).map(|run| fmt3(store.peaks(run)[step].intensity));
            writer.write_record(wavelengths.chain(intensities))?;
        }
        writer.flush()?;
        Ok(path)
    }

    #[cfg(feature = "storage_csv")]
    fn write_summary(&self, results: &ExperimentResults) -> AppResult<PathBuf> {
        let path = self.folder.join(SUMMARY_FILE);
        let plan = &results.plan;
        let step_delays: Vec<f64> = plan.iter().map(|r| r.step_delay_s).collect();
        let powers: Vec<f64> = plan.iter().map(|r| r.power_mw).collect();

        let mut file = File::create(&path)?;
        writeln!(file, "experiment id: {}", results.id)?;
        writeln!(file, "started: {}", results.started_at.to_rfc3339())?;
        writeln!(file, "finished: {}", results.finished_at.to_rfc3339())?;
        writeln!(file, "number of runs: {}", plan.len())?;
        writeln!(file, "number of steps in each run: {:?}", plan.step_counts())?;
        writeln!(file, "delay between steps: {step_delays:?} sec")?;
        writeln!(file, "delay between runs: {:?} sec", plan.inter_run_delays_s())?;
        writeln!(
            file,
            "spectrometer integration times: {:?} us",
            plan.integration_times_us()
        )?;
        writeln!(file, "laser power for runs: {powers:?} mW")?;
        writeln!(
            file,
            "laser power readback: {:?} mW",
            results.power_readback_mw
        )?;
        if !results.warnings.is_empty() {
            writeln!(file, "data integrity warnings:")?;
            for warning in &results.warnings {
                writeln!(file, "  {warning}")?;
            }
        }
        Ok(path)
    }

    #[cfg(feature = "storage_csv")]
    fn write_config_snapshot(&self, config: &ExperimentConfig) -> AppResult<PathBuf> {
        let path = self.folder.join(CONFIG_SNAPSHOT_FILE);
        let toml = toml::to_string_pretty(config)
            .map_err(|e| DaqError::Processing(format!("Failed to serialize configuration: {e}")))?;
        std::fs::write(&path, toml)?;
        Ok(path)
    }
}

fn fmt3(value: f64) -> String {
    format!("{value:.3}")
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_folder_name_resolution() {
        let started = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let mut output = OutputConfig {
            directory: PathBuf::from("data"),
            folder_name: String::new(),
        };
        assert_eq!(
            CsvExporter::for_experiment(&output, started).folder(),
            Path::new("data/pl_20240305_140709")
        );

        output.folder_name = "sample A".to_string();
        assert_eq!(
            CsvExporter::for_experiment(&output, started).folder(),
            Path::new("data/sample A")
        );
    }

    #[test]
    fn test_fmt3() {
        assert_eq!(fmt3(1.0), "1.000");
        assert_eq!(fmt3(-0.12345), "-0.123");
        assert_eq!(run_file_name(0), "run 1.csv");
    }
}
