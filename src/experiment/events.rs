//! Progress events published by the acquisition engine.
//!
//! Consumers subscribe through [`AcquisitionEngine::subscribe`](super::AcquisitionEngine::subscribe)
//! and decide themselves how to present progress. Run and step indices are 0-based.

use crate::data::peak::PeakFeature;
use crate::experiment::state::AcquisitionState;
use serde::Serialize;
use uuid::Uuid;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AcquisitionEvent {
    /// The loop entered a new state.
    StateChanged {
        /// New state
        state: AcquisitionState,
    },
    /// Laser powered up for a run.
    RunStarted {
        /// Run index
        run: usize,
        /// Requested power (mW)
        power_mw: f64,
        /// Power setpoint reported by the laser (mW)
        readback_mw: f64,
        /// Integration time for every capture of the run (µs)
        integration_time_us: u32,
        /// Number of captures planned
        step_count: usize,
    },
    /// One spectrum captured and processed.
    StepCaptured {
        /// Run index
        run: usize,
        /// Step index
        step: usize,
        /// Seconds since experiment start (not yet re-based)
        time_s: f64,
        /// Extracted peak
        peak: PeakFeature,
    },
    /// Laser emission switched off.
    LaserOff,
    /// Every step of a run captured.
    RunFinished {
        /// Run index
        run: usize,
        /// Steps captured
        steps: usize,
    },
    /// Experiment completed and times re-based.
    ExperimentFinished {
        /// Experiment identifier
        id: Uuid,
        /// Total captures
        captures: usize,
        /// Number of data-integrity warnings raised
        warnings: usize,
    },
}
