//! Experiment orchestration.
//!
//! - [`plan`]: validated per-run parameters
//! - [`axis`]: wavelength window
//! - [`background`]: dark-spectrum calibration
//! - [`run_engine`]: the acquisition loop
//! - [`state`], [`events`]: lifecycle state and progress events

pub mod axis;
pub mod background;
pub mod events;
pub mod plan;
pub mod run_engine;
pub mod state;

pub use axis::WavelengthAxis;
pub use background::BackgroundTable;
pub use events::AcquisitionEvent;
pub use plan::{ParallelRunArrays, RunPlan, RunSpec};
pub use run_engine::{AcquisitionEngine, ExperimentResults};
pub use state::AcquisitionState;
