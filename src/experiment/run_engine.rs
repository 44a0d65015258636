//! Acquisition engine: the scheduler driving laser and spectrometer.
//!
//! One experiment is a single logical timeline. Hardware calls are awaited strictly in
//! order, and every delay (laser settle, step, inter-run) is an explicit
//! `tokio::time::sleep`, so paused-clock tests see exactly the configured schedule.
//!
//! # Sequence
//!
//! ```text
//! laser off ─> read axis ─> background (per run position, laser off)
//!   for each run:
//!     CW mode ─> set power ─> laser on ─> power readback
//!     for each step:
//!       set integration time ─> capture ─> trim ─> subtract background
//!       ─> extract peak ─> timestamp ─> store ─> step delay (not after last step)
//!     cooldown delay != 0: laser off, sleep (not after last run)
//! laser off ─> re-base times
//! ```
//!
//! # Safety
//!
//! Any failure after the first hardware call triggers a best-effort laser-off before the
//! error is returned. If that laser-off fails too, both errors come back together in
//! [`DaqError::ShutdownFailed`].

use crate::config::{ExperimentConfig, WindowConfig};
use crate::data::peak::PeakExtractor;
use crate::data::store::{round_centis, Capture, DataIntegrityWarning, ResultStore};
use crate::error::{AppResult, ConfigurationError, DaqError};
use crate::experiment::axis::WavelengthAxis;
use crate::experiment::background::{self, BackgroundTable};
use crate::experiment::events::AcquisitionEvent;
use crate::experiment::plan::{RunPlan, RunSpec};
use crate::experiment::state::AcquisitionState;
use crate::hardware::capabilities::{LaserControl, Spectrometer};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

/// Everything an experiment produced.
#[derive(Debug, Clone)]
pub struct ExperimentResults {
    /// Experiment identifier
    pub id: Uuid,
    /// Wall-clock start
    pub started_at: DateTime<Local>,
    /// Wall-clock end
    pub finished_at: DateTime<Local>,
    /// Plan that was executed
    pub plan: RunPlan,
    /// Trimmed wavelength axis
    pub axis: WavelengthAxis,
    /// Background spectra, one per run
    pub background: BackgroundTable,
    /// Corrected spectra, re-based times, peaks
    pub store: ResultStore,
    /// Laser power readback per run (mW)
    pub power_readback_mw: Vec<f64>,
    /// Non-fatal data problems
    pub warnings: Vec<DataIntegrityWarning>,
}

/// Runs a [`RunPlan`] against one laser and one spectrometer.
///
/// # Example
///
/// ```rust,ignore
/// let config = ExperimentConfig::load_from("config/experiment.toml")?;
/// let engine = AcquisitionEngine::new(&config, laser, spectrometer)?;
/// let mut events = engine.subscribe();
/// let results = engine.run().await?;
/// ```
pub struct AcquisitionEngine {
    laser: Arc<dyn LaserControl>,
    spectrometer: Arc<dyn Spectrometer>,
    plan: RunPlan,
    window: WindowConfig,
    extractor: PeakExtractor,
    settle_delay: Duration,
    state: Mutex<AcquisitionState>,
    events: broadcast::Sender<AcquisitionEvent>,
}

impl AcquisitionEngine {
    /// Validate the configuration and prepare an engine.
    ///
    /// Fails with every configuration violation before any hardware is touched.
    pub fn new(
        config: &ExperimentConfig,
        laser: Arc<dyn LaserControl>,
        spectrometer: Arc<dyn Spectrometer>,
    ) -> Result<Self, ConfigurationError> {
        let plan = config.run_plan()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            laser,
            spectrometer,
            plan,
            window: config.window,
            extractor: PeakExtractor::from_config(&config.processing),
            settle_delay: config.settle_delay(),
            state: Mutex::new(AcquisitionState::Idle),
            events,
        })
    }

    /// Receive progress events of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    /// Validated plan
    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Current lifecycle state
    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    /// Execute the whole experiment.
    ///
    /// On success the laser is off and all capture times are re-based to the first
    /// capture. On failure the laser has been switched off (or [`DaqError::ShutdownFailed`]
    /// says it could not be).
    pub async fn run(&self) -> AppResult<ExperimentResults> {
        self.begin()?;

        let id = Uuid::new_v4();
        let started_at = Local::now();
        info!(
            %id,
            runs = self.plan.len(),
            nominal_wait_s = self.plan.nominal_wait().as_secs_f64(),
            "Starting experiment"
        );

        match self.execute(id, started_at).await {
            Ok(results) => {
                self.set_state(AcquisitionState::Finished);
                self.emit(AcquisitionEvent::ExperimentFinished {
                    id,
                    captures: results.store.capture_count(),
                    warnings: results.warnings.len(),
                });
                info!(%id, captures = results.store.capture_count(), "Experiment finished");
                Ok(results)
            }
            Err(err) => Err(self.abort(err).await),
        }
    }

    async fn execute(&self, id: Uuid, started_at: DateTime<Local>) -> AppResult<ExperimentResults> {
        self.laser_off().await?;

        self.set_state(AcquisitionState::Calibrating);
        let device_axis = self
            .spectrometer
            .wavelengths()
            .await
            .map_err(hardware("spectrometer", "wavelengths"))?;
        let axis =
            WavelengthAxis::from_device_axis(&device_axis, self.window.start_nm, self.window.finish_nm)?;
        info!(
            pixels = axis.len(),
            start_nm = self.window.start_nm,
            finish_nm = self.window.finish_nm,
            "Wavelength window"
        );
        let background = background::calibrate(
            self.spectrometer.as_ref(),
            &self.plan.integration_times_us(),
            &axis,
        )
        .await?;

        let mut store = ResultStore::new(&self.plan.step_counts(), axis.len());
        let mut power_readback_mw = Vec::with_capacity(self.plan.len());
        let clock = Instant::now();

        for (index, run) in self.plan.iter().enumerate() {
            let readback = self.power_up(index, run).await?;
            power_readback_mw.push(readback);

            self.acquire_run(index, run, &axis, &background, &mut store, clock)
                .await?;

            self.set_state(AcquisitionState::RunDone);
            self.emit(AcquisitionEvent::RunFinished {
                run: index,
                steps: store.valid_len(index),
            });

            let cooldown = self.plan.cooldown_after(index);
            if cooldown != 0.0 {
                self.laser_off().await?;
                if index + 1 < self.plan.len() {
                    self.set_state(AcquisitionState::Cooldown);
                    info!(run = index + 1, delay_s = cooldown, "Laser is off, pausing");
                    sleep(Duration::from_secs_f64(cooldown)).await;
                }
            }
        }

        self.laser_off().await?;

        let warnings = store.rebase_times();
        Ok(ExperimentResults {
            id,
            started_at,
            finished_at: Local::now(),
            plan: self.plan.clone(),
            axis,
            background,
            store,
            power_readback_mw,
            warnings,
        })
    }

    /// CW mode, power, emission on; returns the power readback.
    #[instrument(skip(self, run), fields(run = index + 1, power_mw = run.power_mw))]
    async fn power_up(&self, index: usize, run: &RunSpec) -> AppResult<f64> {
        self.set_state(AcquisitionState::PoweringUp);

        self.laser
            .set_cw_power_mode()
            .await
            .map_err(hardware("laser", "set_cw_power_mode"))?;
        self.settle().await;
        self.laser
            .set_power(run.power_mw)
            .await
            .map_err(hardware("laser", "set_power"))?;
        self.settle().await;
        self.laser
            .turn_on()
            .await
            .map_err(hardware("laser", "turn_on"))?;
        self.settle().await;

        let readback_mw = self
            .laser
            .query_power()
            .await
            .map_err(hardware("laser", "query_power"))?;
        info!(readback_mw, "Laser on");

        self.emit(AcquisitionEvent::RunStarted {
            run: index,
            power_mw: run.power_mw,
            readback_mw,
            integration_time_us: run.integration_time_us,
            step_count: run.step_count,
        });
        Ok(readback_mw)
    }

    async fn acquire_run(
        &self,
        index: usize,
        run: &RunSpec,
        axis: &WavelengthAxis,
        background: &BackgroundTable,
        store: &mut ResultStore,
        clock: Instant,
    ) -> AppResult<()> {
        self.set_state(AcquisitionState::Stepping);

        for step in 0..run.step_count {
            self.set_state(AcquisitionState::Capturing);
            self.spectrometer
                .set_integration_time(run.integration_time_us)
                .await
                .map_err(hardware("spectrometer", "set_integration_time"))?;
            let raw = self
                .spectrometer
                .capture_intensities()
                .await
                .map_err(hardware("spectrometer", "capture_intensities"))?;

            let corrected = background.subtract(index, &axis.trim(&raw)?)?;
            let peak = self.extractor.extract_peak(&corrected, axis.wavelengths())?;
            let time_s = round_centis(clock.elapsed().as_secs_f64());

            store.record(Capture {
                run: index,
                step,
                time_s,
                corrected,
                peak,
            })?;
            info!(
                run = index + 1,
                runs = self.plan.len(),
                step = step + 1,
                steps = run.step_count,
                time_s,
                peak_nm = peak.wavelength,
                "Captured"
            );
            self.emit(AcquisitionEvent::StepCaptured {
                run: index,
                step,
                time_s,
                peak,
            });

            if step + 1 < run.step_count {
                self.set_state(AcquisitionState::Waiting);
                sleep(run.step_delay()).await;
            }
        }
        Ok(())
    }

    async fn laser_off(&self) -> AppResult<()> {
        self.laser
            .turn_off()
            .await
            .map_err(hardware("laser", "turn_off"))?;
        self.settle().await;
        self.emit(AcquisitionEvent::LaserOff);
        Ok(())
    }

    /// Safety shutdown after a failure; returns the error to surface.
    async fn abort(&self, err: DaqError) -> DaqError {
        error!(error = %err, "Acquisition aborted, switching laser off");
        self.set_state(AcquisitionState::Aborted);

        match self.laser.turn_off().await {
            Ok(()) => {
                self.settle().await;
                self.emit(AcquisitionEvent::LaserOff);
                warn!("Laser switched off after abort");
                err
            }
            Err(shutdown) => {
                error!(error = %shutdown, "Safety laser-off failed, laser state unknown");
                DaqError::ShutdownFailed(vec![err, DaqError::hardware("laser", "turn_off", shutdown)])
            }
        }
    }

    /// Claim the engine for one experiment. Checked and switched under a single lock.
    fn begin(&self) -> AppResult<()> {
        let mut current = self.state.lock();
        if !current.can_begin() {
            return Err(DaqError::Processing(format!(
                "cannot start an experiment while {}",
                *current
            )));
        }
        let from = *current;
        *current = AcquisitionState::Calibrating;
        drop(current);
        debug!(%from, to = %AcquisitionState::Calibrating, "State change");
        self.emit(AcquisitionEvent::StateChanged {
            state: AcquisitionState::Calibrating,
        });
        Ok(())
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            sleep(self.settle_delay).await;
        }
    }

    fn set_state(&self, state: AcquisitionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = %*current, to = %state, "State change");
            *current = state;
            drop(current);
            self.emit(AcquisitionEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: AcquisitionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn hardware(device: &'static str, operation: &'static str) -> impl FnOnce(anyhow::Error) -> DaqError {
    move |err| DaqError::hardware(device, operation, err)
}
