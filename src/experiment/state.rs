//! Acquisition lifecycle state.

use serde::{Deserialize, Serialize};

/// Where the acquisition loop currently is.
///
/// # State Machine
///
/// ```text
/// Idle ──> Calibrating ──> PoweringUp ──> Stepping ──> Capturing ──> Waiting ─┐
///                              ▲                          ▲                   │
///                              │                          └───────────────────┘
///                              │                          │ last step
///                              │                          ▼
///                              └──── Cooldown <──────── RunDone ──> Finished
///
/// any state ──error──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// Nothing started yet
    Idle,
    /// Safety laser-off, then background spectra with the laser off
    Calibrating,
    /// Configuring laser mode and power, enabling emission
    PoweringUp,
    /// Run set up, steps about to start
    Stepping,
    /// Spectrometer exposure in progress
    Capturing,
    /// Sleeping the step delay
    Waiting,
    /// All steps of the current run captured
    RunDone,
    /// Laser off, sleeping the inter-run delay
    Cooldown,
    /// Every run completed, laser off
    Finished,
    /// Stopped on an error
    Aborted,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "Idle",
            AcquisitionState::Calibrating => "Calibrating",
            AcquisitionState::PoweringUp => "PoweringUp",
            AcquisitionState::Stepping => "Stepping",
            AcquisitionState::Capturing => "Capturing",
            AcquisitionState::Waiting => "Waiting",
            AcquisitionState::RunDone => "RunDone",
            AcquisitionState::Cooldown => "Cooldown",
            AcquisitionState::Finished => "Finished",
            AcquisitionState::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

impl AcquisitionState {
    /// Check if the acquisition has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AcquisitionState::Finished | AcquisitionState::Aborted)
    }

    /// Check if an experiment may be started from this state.
    pub fn can_begin(&self) -> bool {
        matches!(self, AcquisitionState::Idle) || self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(AcquisitionState::Finished.is_terminal());
        assert!(AcquisitionState::Aborted.is_terminal());
        assert!(!AcquisitionState::Cooldown.is_terminal());
    }

    #[test]
    fn test_can_begin() {
        assert!(AcquisitionState::Idle.can_begin());
        assert!(AcquisitionState::Aborted.can_begin());
        assert!(!AcquisitionState::Capturing.can_begin());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(AcquisitionState::PoweringUp.to_string(), "PoweringUp");
        let json = serde_json::to_string(&AcquisitionState::RunDone).unwrap();
        assert_eq!(json, "\"RunDone\"");
    }
}
