//! CLI Entry Point for pl_daq
//!
//! # Usage
//!
//! Run an experiment on real hardware:
//! ```bash
//! pl_daq run --config config/experiment.toml
//! ```
//!
//! Dry run against simulated instruments:
//! ```bash
//! pl_daq run --config config/experiment.toml --mock
//! ```
//!
//! Check a configuration without touching hardware:
//! ```bash
//! pl_daq validate --config config/experiment.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pl_daq::config::{ExperimentConfig, LaserDriver, SpectrometerDriver};
use pl_daq::data::export::CsvExporter;
use pl_daq::error::DaqError;
use pl_daq::experiment::{AcquisitionEngine, AcquisitionEvent};
use pl_daq::hardware::capabilities::{LaserControl, Spectrometer};
use pl_daq::hardware::mock::{MockLaser, MockSpectrometer};
use pl_daq::logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "pl_daq")]
#[command(about = "Photoluminescence degradation acquisition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment and export the results
    Run {
        /// Experiment configuration (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Use simulated laser and spectrometer
        #[arg(long)]
        mock: bool,
    },

    /// Validate a configuration and print the run plan
    Validate {
        /// Experiment configuration (TOML)
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, mock } => run_experiment(config, mock).await,
        Commands::Validate { config } => validate(config),
    }
}

fn load(path: &Path) -> Result<ExperimentConfig> {
    let config = ExperimentConfig::load_from(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn validate(path: PathBuf) -> Result<()> {
    let config = load(&path)?;
    let plan = config.run_plan()?;

    for (index, run) in plan.iter().enumerate() {
        info!(
            run = index + 1,
            power_mw = run.power_mw,
            integration_time_us = run.integration_time_us,
            steps = run.step_count,
            step_delay_s = run.step_delay_s,
            inter_run_delay_s = run.inter_run_delay_s,
            "Run"
        );
    }
    info!(
        runs = plan.len(),
        captures = plan.step_counts().iter().sum::<usize>(),
        nominal_duration_s = plan.nominal_wait().as_secs_f64(),
        "Configuration is valid"
    );
    Ok(())
}

async fn run_experiment(path: PathBuf, mock: bool) -> Result<()> {
    let config = load(&path)?;
    let (laser, spectrometer) = connect(&config, mock).await?;

    let engine = AcquisitionEngine::new(&config, laser.clone(), spectrometer)?;
    let progress = tokio::spawn(log_progress(
        engine.subscribe(),
        engine.plan().step_counts().iter().sum(),
    ));

    let outcome = tokio::select! {
        result = engine.run() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, switching laser off");
            laser
                .turn_off()
                .await
                .map_err(|e| DaqError::hardware("laser", "turn_off", e))?;
            bail!("experiment interrupted");
        }
    };
    drop(engine);
    let _ = progress.await;

    let results = match outcome {
        Ok(results) => results,
        Err(err) => {
            error!(error = %err, "Experiment failed");
            return Err(err.into());
        }
    };

    let exporter = CsvExporter::for_experiment(&config.output, results.started_at);
    let folder = exporter.folder().to_path_buf();
    tokio::task::spawn_blocking(move || exporter.export(&results, &config))
        .await
        .context("Export task panicked")??;
    info!(folder = %folder.display(), "Done");
    Ok(())
}

/// Instantiate the configured instruments.
async fn connect(
    config: &ExperimentConfig,
    mock: bool,
) -> Result<(Arc<dyn LaserControl>, Arc<dyn Spectrometer>)> {
    let mock_laser = if mock || config.laser.driver == LaserDriver::Mock {
        info!("Using mock laser");
        Some(Arc::new(MockLaser::new()))
    } else {
        None
    };

    let spectrometer: Arc<dyn Spectrometer> = match config.spectrometer.driver {
        SpectrometerDriver::Mock => {
            info!("Using mock spectrometer");
            let spectrometer = MockSpectrometer::new();
            match &mock_laser {
                Some(laser) => Arc::new(spectrometer.illuminated_by(laser)),
                None => Arc::new(spectrometer),
            }
        }
    };

    let laser: Arc<dyn LaserControl> = match mock_laser {
        Some(laser) => laser as Arc<dyn LaserControl>,
        None => open_obis(config).await?,
    };
    Ok((laser, spectrometer))
}

#[cfg(feature = "instrument_serial")]
async fn open_obis(config: &ExperimentConfig) -> Result<Arc<dyn LaserControl>> {
    use pl_daq::hardware::obis::ObisLaser;
    use std::time::Duration;

    let laser = ObisLaser::open(
        &config.laser.port,
        config.laser.baud_rate,
        Duration::from_millis(config.laser.timeout_ms),
    )?;
    let identity = laser.identify().await?;
    info!(port = %config.laser.port, identity = %identity, "OBIS laser connected");
    Ok(Arc::new(laser))
}

#[cfg(not(feature = "instrument_serial"))]
async fn open_obis(_config: &ExperimentConfig) -> Result<Arc<dyn LaserControl>> {
    Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
}

async fn log_progress(
    mut events: tokio::sync::broadcast::Receiver<AcquisitionEvent>,
    total_captures: usize,
) {
    let mut captured = 0usize;
    loop {
        let event = events.recv().await;
        if let Ok(event) = &event {
            if let Ok(json) = serde_json::to_string(event) {
                debug!(event = %json, "Acquisition event");
            }
        }
        match event {
            Ok(AcquisitionEvent::StepCaptured { .. }) => {
                captured += 1;
                info!(captured, total = total_captures, "Progress");
            }
            Ok(AcquisitionEvent::RunFinished { run, steps }) => {
                info!(run = run + 1, steps, "Run finished");
            }
            Ok(AcquisitionEvent::ExperimentFinished { warnings, .. }) if warnings > 0 => {
                warn!(warnings, "Experiment finished with data integrity warnings");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress reporter fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
