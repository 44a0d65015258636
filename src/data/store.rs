//! Fixed-capacity result arena.
//!
//! Runs may have different step counts. The store allocates `run_count * max_step_count`
//! cells up front for spectra, capture times and peak features, and tracks how many
//! steps of each run were actually written. Spectrum readers only ever see written rows;
//! the time and peak tables are exposed zero padded to `max_step_count`.

use crate::data::peak::PeakFeature;
use crate::error::{AppResult, DaqError};
use serde::Serialize;
use tracing::warn;

/// One processed capture, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Run index (0-based)
    pub run: usize,
    /// Step index within the run (0-based)
    pub step: usize,
    /// Seconds since experiment start, rounded to 10 ms
    pub time_s: f64,
    /// Trimmed, background-corrected spectrum
    pub corrected: Vec<f64>,
    /// Peak of the smoothed spectrum
    pub peak: PeakFeature,
}

/// Non-fatal data problem found while finalizing the results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataIntegrityWarning {
    /// Run index
    pub run: usize,
    /// Step index
    pub step: usize,
    /// Re-based time before clamping (negative)
    pub rebased_time_s: f64,
}

impl std::fmt::Display for DataIntegrityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {} step {}: negative re-based time {:.3} s clamped to 0",
            self.run + 1,
            self.step + 1,
            self.rebased_time_s
        )
    }
}

/// Spectra, times and peaks indexed by `(run, step)`.
#[derive(Debug, Clone)]
pub struct ResultStore {
    pixels: usize,
    max_steps: usize,
    step_capacity: Vec<usize>,
    valid_len: Vec<usize>,
    spectra: Vec<f64>,
    times: Vec<f64>,
    peaks: Vec<PeakFeature>,
}

impl ResultStore {
    /// Allocate a store for runs with the given step counts and `pixels` points per
    /// spectrum.
    pub fn new(step_counts: &[usize], pixels: usize) -> Self {
        let runs = step_counts.len();
        let max_steps = step_counts.iter().copied().max().unwrap_or(0);
        Self {
            pixels,
            max_steps,
            step_capacity: step_counts.to_vec(),
            valid_len: vec![0; runs],
            spectra: vec![0.0; runs * max_steps * pixels],
            times: vec![0.0; runs * max_steps],
            peaks: vec![PeakFeature::default(); runs * max_steps],
        }
    }

    /// Number of runs
    pub fn run_count(&self) -> usize {
        self.valid_len.len()
    }

    /// Largest step count of any run
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Points per spectrum
    pub fn pixels(&self) -> usize {
        self.pixels
    }

    /// Steps written so far for `run` (0 for unknown runs)
    pub fn valid_len(&self, run: usize) -> usize {
        self.valid_len.get(run).copied().unwrap_or(0)
    }

    /// Total captures written
    pub fn capture_count(&self) -> usize {
        self.valid_len.iter().sum()
    }

    /// Store a capture.
    ///
    /// Steps of a run must arrive in order, and a run cannot hold more steps than it was
    /// allocated for.
    pub fn record(&mut self, capture: Capture) -> AppResult<()> {
        let Capture {
            run,
            step,
            time_s,
            corrected,
            peak,
        } = capture;

        let capacity = self.step_capacity.get(run).copied().ok_or_else(|| {
            DaqError::Processing(format!("run {run} outside store of {} runs", self.run_count()))
        })?;
        if step >= capacity {
            return Err(DaqError::Processing(format!(
                "step {step} exceeds the {capacity} steps of run {run}"
            )));
        }
        if step != self.valid_len[run] {
            return Err(DaqError::Processing(format!(
                "run {run} expected step {}, got {step}",
                self.valid_len[run]
            )));
        }
        if corrected.len() != self.pixels {
            return Err(DaqError::Processing(format!(
                "spectrum has {} points, store expects {}",
                corrected.len(),
                self.pixels
            )));
        }

        let cell = self.cell(run, step);
        let offset = cell * self.pixels;
        self.spectra[offset..offset + self.pixels].copy_from_slice(&corrected);
        self.times[cell] = time_s;
        self.peaks[cell] = peak;
        self.valid_len[run] += 1;
        Ok(())
    }

    /// Shift every written time so the first capture is at zero.
    ///
    /// Re-based times that come out negative are clamped to zero; each one is logged and
    /// returned. Unwritten cells stay at zero.
    pub fn rebase_times(&mut self) -> Vec<DataIntegrityWarning> {
        let mut warnings = Vec::new();
        let Some(origin) = self.first_time() else {
            return warnings;
        };

        for run in 0..self.run_count() {
            for step in 0..self.valid_len[run] {
                let cell = self.cell(run, step);
                let rebased = round_centis(self.times[cell] - origin);
                if rebased < 0.0 {
                    let warning = DataIntegrityWarning {
                        run,
                        step,
                        rebased_time_s: rebased,
                    };
                    warn!(run, step, rebased_time_s = rebased, "Clamping negative capture time");
                    warnings.push(warning);
                    self.times[cell] = 0.0;
                } else {
                    self.times[cell] = rebased;
                }
            }
        }
        warnings
    }

    /// Written spectra of `run`, in step order.
    pub fn run_spectra(&self, run: usize) -> impl Iterator<Item = &[f64]> + '_ {
        let steps = self.valid_len(run);
        (0..steps).map(move |step| {
            let offset = self.cell(run, step) * self.pixels;
            &self.spectra[offset..offset + self.pixels]
        })
    }

    /// Capture times of `run`, zero padded to `max_steps`.
    pub fn times(&self, run: usize) -> &[f64] {
        self.row(&self.times, run)
    }

    /// Peak features of `run`, zero padded to `max_steps`.
    pub fn peaks(&self, run: usize) -> &[PeakFeature] {
        self.row(&self.peaks, run)
    }

    /// Time of a written capture
    pub fn capture_time(&self, run: usize, step: usize) -> Option<f64> {
        (step < self.valid_len(run)).then(|| self.times[self.cell(run, step)])
    }

    fn row<'a, T>(&self, table: &'a [T], run: usize) -> &'a [T] {
        if run >= self.run_count() {
            return &[];
        }
        let start = run * self.max_steps;
        &table[start..start + self.max_steps]
    }

    fn cell(&self, run: usize, step: usize) -> usize {
        run * self.max_steps + step
    }

    fn first_time(&self) -> Option<f64> {
        (0..self.run_count())
            .find(|&run| self.valid_len[run] > 0)
            .map(|run| self.times[self.cell(run, 0)])
    }
}

/// Round seconds to two decimals.
pub fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
