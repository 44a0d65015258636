//! Run plan: the validated, per-run parameter bundle.
//!
//! A photoluminescence-degradation experiment is a sequence of runs. Each run holds the
//! laser at one power and captures `step_count` spectra spaced `step_delay` apart with a
//! fixed integration time. Between runs the laser may be switched off for a cooldown.
//!
//! Plans are built from the parallel arrays of the configuration file. Validation never
//! short-circuits: every violated constraint ends up in one [`ConfigurationError`].

use crate::error::{ConfigViolation, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Laser power in milliwatts
    pub power_mw: f64,
    /// Spectrometer integration time in microseconds
    pub integration_time_us: u32,
    /// Number of captures in this run
    pub step_count: usize,
    /// Pause between consecutive captures, in seconds
    pub step_delay_s: f64,
    /// Pause before the next run, in seconds (`None` for the last run)
    pub inter_run_delay_s: Option<f64>,
}

impl RunSpec {
    /// Step delay as a [`Duration`]
    pub fn step_delay(&self) -> Duration {
        Duration::from_secs_f64(self.step_delay_s)
    }
}

/// Borrowed view of the parallel configuration arrays a plan is built from.
#[derive(Debug, Clone, Copy)]
pub struct ParallelRunArrays<'a> {
    /// Laser power per run (mW)
    pub power_mw: &'a [f64],
    /// Integration time per run (µs)
    pub integration_time_us: &'a [u32],
    /// Captures per run
    pub step_count: &'a [usize],
    /// Step delay per run (s)
    pub step_delay_s: &'a [f64],
    /// Delay between runs (s), one fewer than the run count
    pub inter_run_delay_s: &'a [f64],
}

/// Ordered, validated sequence of runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    runs: Vec<RunSpec>,
}

impl RunPlan {
    /// Build a plan from parallel arrays.
    ///
    /// Checks, all in one pass:
    /// - `power_mw`, `integration_time_us`, `step_count`, `step_delay_s` share the run
    ///   count `R` (taken from `power_mw`), and `R >= 1`
    /// - `inter_run_delay_s` has length `R - 1`
    /// - every power and delay is finite and non-negative, every integration time and
    ///   step count is positive
    /// - every delay fits in a [`Duration`]
    pub fn from_parallel(arrays: ParallelRunArrays<'_>) -> Result<Self, ConfigurationError> {
        let run_count = arrays.power_mw.len();
        let mut violations = Vec::new();

        if run_count == 0 {
            violations.push(ConfigViolation::EmptyPlan);
        }

        let lengths = [
            ("integration_time_us", arrays.integration_time_us.len()),
            ("step_count", arrays.step_count.len()),
            ("step_delay_s", arrays.step_delay_s.len()),
        ];
        for (field, actual) in lengths {
            if actual != run_count {
                violations.push(ConfigViolation::LengthMismatch {
                    field,
                    expected: run_count,
                    actual,
                });
            }
        }

        let expected_gaps = run_count.saturating_sub(1);
        if run_count > 0 && arrays.inter_run_delay_s.len() != expected_gaps {
            violations.push(ConfigViolation::LengthMismatch {
                field: "inter_run_delay_s",
                expected: expected_gaps,
                actual: arrays.inter_run_delay_s.len(),
            });
        }

        check_non_negative("power_mw", arrays.power_mw, &mut violations);
        for (index, &value) in arrays.integration_time_us.iter().enumerate() {
            if value == 0 {
                violations.push(ConfigViolation::InvalidValue {
                    field: "integration_time_us",
                    index,
                    value: value.to_string(),
                    reason: "must be positive",
                });
            }
        }
        for (index, &value) in arrays.step_count.iter().enumerate() {
            if value == 0 {
                violations.push(ConfigViolation::InvalidValue {
                    field: "step_count",
                    index,
                    value: value.to_string(),
                    reason: "a run needs at least one step",
                });
            }
        }
        check_delay("step_delay_s", arrays.step_delay_s, &mut violations);
        check_delay("inter_run_delay_s", arrays.inter_run_delay_s, &mut violations);

        ConfigurationError::check(violations)?;

        let runs = (0..run_count)
            .map(|i| RunSpec {
                power_mw: arrays.power_mw[i],
                integration_time_us: arrays.integration_time_us[i],
                step_count: arrays.step_count[i],
                step_delay_s: arrays.step_delay_s[i],
                inter_run_delay_s: arrays.inter_run_delay_s.get(i).copied(),
            })
            .collect();

        Ok(Self { runs })
    }

    /// Number of runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Always false for a validated plan
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Run at `index`
    pub fn run(&self, index: usize) -> Option<&RunSpec> {
        self.runs.get(index)
    }

    /// Iterate runs in order
    pub fn iter(&self) -> impl Iterator<Item = &RunSpec> {
        self.runs.iter()
    }

    /// Largest step count across runs (capacity of the result store)
    pub fn max_step_count(&self) -> usize {
        self.runs.iter().map(|r| r.step_count).max().unwrap_or(0)
    }

    /// Step count of every run, in order
    pub fn step_counts(&self) -> Vec<usize> {
        self.runs.iter().map(|r| r.step_count).collect()
    }

    /// Integration time of every run, in order (not deduplicated)
    pub fn integration_times_us(&self) -> Vec<u32> {
        self.runs.iter().map(|r| r.integration_time_us).collect()
    }

    /// Configured inter-run delays (`R - 1` entries)
    pub fn inter_run_delays_s(&self) -> Vec<f64> {
        self.runs.iter().filter_map(|r| r.inter_run_delay_s).collect()
    }

    /// Delay that decides whether the laser is switched off after run `index`.
    ///
    /// Runs before the last use their own inter-run delay. The last run reuses the last
    /// configured delay, so an experiment with cooldowns also ends with a laser-off right
    /// after its final capture. A single-run plan has no delays and yields zero.
    pub fn cooldown_after(&self, index: usize) -> f64 {
        match self.runs.get(index).and_then(|r| r.inter_run_delay_s) {
            Some(delay) => delay,
            None => self
                .runs
                .iter()
                .rev()
                .find_map(|r| r.inter_run_delay_s)
                .unwrap_or(0.0),
        }
    }

    /// Total time spent in configured waits, ignoring settle delays and exposure.
    pub fn nominal_wait(&self) -> Duration {
        let seconds: f64 = self
            .runs
            .iter()
            .map(|r| {
                r.step_delay_s * r.step_count.saturating_sub(1) as f64
                    + r.inter_run_delay_s.unwrap_or(0.0)
            })
            .sum();
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

fn check_non_negative(field: &'static str, values: &[f64], violations: &mut Vec<ConfigViolation>) {
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            violations.push(ConfigViolation::InvalidValue {
                field,
                index,
                value: value.to_string(),
                reason: "must be finite and non-negative",
            });
        }
    }
}

fn check_delay(field: &'static str, values: &[f64], violations: &mut Vec<ConfigViolation>) {
    let before = violations.len();
    check_non_negative(field, values, violations);
    if violations.len() > before {
        return;
    }
    for (index, &value) in values.iter().enumerate() {
        if Duration::try_from_secs_f64(value).is_err() {
            violations.push(ConfigViolation::InvalidValue {
                field,
                index,
                value: value.to_string(),
                reason: "delay is too long",
            });
        }
    }
}
