//! Mock Hardware Implementations
//!
//! Provides simulated instruments for dry runs and tests without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockLaser` - CW laser with emission state and power setpoint
//! - `MockSpectrometer` - array spectrometer producing a dark offset plus, when linked to
//!   an emitting `MockLaser`, a photoluminescence peak that slowly red-shifts and fades
//!
//! Every hardware call is appended to a [`CallLog`]. Sharing one log between the laser
//! and the spectrometer records the global command order, which is what the safety
//! ordering tests look at.
//!
//! # Fault Injection
//!
//! - `MockSpectrometer::fail_on_capture(n)` fails the n-th capture (1-based, background
//!   captures included)
//! - `MockLaser::fail_on_power_change(n)` fails the n-th `set_power`
//! - `MockLaser::failing_turn_off()` makes every `turn_off` fail

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::hardware::capabilities::{LaserControl, Spectrometer};

// =============================================================================
// CallLog - shared record of hardware calls
// =============================================================================

/// One recorded hardware call.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    /// `LaserControl::turn_on`
    LaserOn,
    /// `LaserControl::turn_off`
    LaserOff,
    /// `LaserControl::set_cw_power_mode`
    LaserCwMode,
    /// `LaserControl::set_power`
    LaserSetPower {
        /// Requested power in mW
        milliwatts: f64,
    },
    /// `LaserControl::query_power`
    LaserQueryPower,
    /// `Spectrometer::set_integration_time`
    SetIntegrationTime {
        /// Requested integration time
        micros: u32,
    },
    /// `Spectrometer::capture_intensities`
    Capture {
        /// Whether the linked laser was emitting during the exposure
        illuminated: bool,
    },
    /// `Spectrometer::wavelengths`
    Wavelengths,
}

/// Append-only log of hardware calls, cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<HardwareCall>>>,
}

impl CallLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: HardwareCall) {
        self.calls.lock().push(call);
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.calls.lock().clone()
    }

    /// Number of calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&HardwareCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Last recorded call
    pub fn last(&self) -> Option<HardwareCall> {
        self.calls.lock().last().cloned()
    }
}

// =============================================================================
// MockLaser - Simulated CW Laser
// =============================================================================

#[derive(Debug, Default)]
struct LaserState {
    emitting: AtomicBool,
    power_mw: RwLock<f64>,
}

/// Mock CW laser
///
/// Tracks emission state and power setpoint. Power must be within
/// `0.0..=max_power_mw` (default 110 mW).
///
/// # Example
///
/// ```rust,ignore
/// let laser = MockLaser::new();
/// laser.set_power(20.0).await?;
/// laser.turn_on().await?;
/// assert!(laser.is_emitting());
/// ```
pub struct MockLaser {
    state: Arc<LaserState>,
    max_power_mw: f64,
    log: CallLog,
    power_changes: AtomicUsize,
    fail_power_change: Option<usize>,
    fail_turn_off: bool,
}

impl MockLaser {
    /// Create a new mock laser, emission off, 0 mW
    pub fn new() -> Self {
        Self {
            state: Arc::new(LaserState::default()),
            max_power_mw: 110.0,
            log: CallLog::new(),
            power_changes: AtomicUsize::new(0),
            fail_power_change: None,
            fail_turn_off: false,
        }
    }

    /// Record calls into a shared log
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Fail the n-th `set_power` call (1-based)
    pub fn fail_on_power_change(mut self, nth: usize) -> Self {
        self.fail_power_change = Some(nth);
        self
    }

    /// Make every `turn_off` fail
    pub fn failing_turn_off(mut self) -> Self {
        self.fail_turn_off = true;
        self
    }

    /// Call log of this laser
    pub fn call_log(&self) -> &CallLog {
        &self.log
    }

    /// Whether emission is currently enabled
    pub fn is_emitting(&self) -> bool {
        self.state.emitting.load(Ordering::SeqCst)
    }

    /// Current power setpoint in mW
    pub async fn power_mw(&self) -> f64 {
        *self.state.power_mw.read().await
    }
}

impl Default for MockLaser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LaserControl for MockLaser {
    async fn turn_on(&self) -> Result<()> {
        self.log.push(HardwareCall::LaserOn);
        self.state.emitting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn turn_off(&self) -> Result<()> {
        self.log.push(HardwareCall::LaserOff);
        if self.fail_turn_off {
            return Err(anyhow!("MockLaser: no reply to SOUR:AM:STATE OFF"));
        }
        self.state.emitting.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_cw_power_mode(&self) -> Result<()> {
        self.log.push(HardwareCall::LaserCwMode);
        Ok(())
    }

    async fn set_power(&self, milliwatts: f64) -> Result<()> {
        self.log.push(HardwareCall::LaserSetPower { milliwatts });
        let count = self.power_changes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_power_change == Some(count) {
            return Err(anyhow!("MockLaser: serial write failed"));
        }
        if !(0.0..=self.max_power_mw).contains(&milliwatts) {
            return Err(anyhow!(
                "MockLaser: power {} mW out of range (0-{} mW)",
                milliwatts,
                self.max_power_mw
            ));
        }
        *self.state.power_mw.write().await = milliwatts;
        Ok(())
    }

    async fn query_power(&self) -> Result<f64> {
        self.log.push(HardwareCall::LaserQueryPower);
        Ok(*self.state.power_mw.read().await)
    }
}

// =============================================================================
// MockSpectrometer - Simulated Array Spectrometer
// =============================================================================

/// Pixel count of the simulated detector
pub const MOCK_PIXELS: usize = 1024;
const AXIS_START_NM: f64 = 340.0;
const AXIS_STOP_NM: f64 = 1030.0;
const DARK_COUNTS: f64 = 950.0;
const PEAK_CENTER_NM: f64 = 530.0;
const PEAK_WIDTH_NM: f64 = 12.0;
const PEAK_DRIFT_NM: f64 = 0.05;
const PEAK_FADE: f64 = 0.998;

/// Mock array spectrometer
///
/// Simulates a spectrometer with:
/// - 1024 pixels from 340 nm to 1030 nm
/// - Dark offset proportional to integration time plus Gaussian-ish read noise
/// - A photoluminescence peak near 530 nm while the linked laser emits; amplitude scales
///   with laser power and integration time, the peak red-shifts by 0.05 nm and fades by
///   0.2 % per illuminated capture
/// - Exposure time simulated with `tokio::time::sleep`
pub struct MockSpectrometer {
    wavelengths: Vec<f64>,
    integration_time_us: AtomicUsize,
    laser: Option<Arc<LaserState>>,
    illuminated_captures: AtomicUsize,
    captures: AtomicUsize,
    fail_capture: Option<usize>,
    noise: Option<Mutex<StdRng>>,
    simulate_exposure: bool,
    log: CallLog,
}

impl MockSpectrometer {
    /// Create a new mock spectrometer, dark (no linked laser), with seeded noise
    pub fn new() -> Self {
        let wavelengths = (0..MOCK_PIXELS)
            .map(|i| {
                AXIS_START_NM + (AXIS_STOP_NM - AXIS_START_NM) * i as f64 / (MOCK_PIXELS - 1) as f64
            })
            .collect();
        Self {
            wavelengths,
            integration_time_us: AtomicUsize::new(100_000),
            laser: None,
            illuminated_captures: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            fail_capture: None,
            noise: Some(Mutex::new(StdRng::seed_from_u64(0x5eed))),
            simulate_exposure: true,
            log: CallLog::new(),
        }
    }

    /// See photoluminescence while `laser` emits
    pub fn illuminated_by(mut self, laser: &MockLaser) -> Self {
        self.laser = Some(Arc::clone(&laser.state));
        self
    }

    /// Record calls into a shared log
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Fail the n-th capture (1-based)
    pub fn fail_on_capture(mut self, nth: usize) -> Self {
        self.fail_capture = Some(nth);
        self
    }

    /// Disable read noise (fully deterministic spectra)
    pub fn without_noise(mut self) -> Self {
        self.noise = None;
        self
    }

    /// Return immediately instead of sleeping for the integration time
    pub fn without_exposure_delay(mut self) -> Self {
        self.simulate_exposure = false;
        self
    }

    /// Call log of this spectrometer
    pub fn call_log(&self) -> &CallLog {
        &self.log
    }

    /// Number of captures so far
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    fn dark_level(integration_time_us: f64) -> f64 {
        DARK_COUNTS * (integration_time_us / 100_000.0).max(0.01)
    }

    /// Spectrum the detector would read, before noise.
    fn expected_spectrum(&self, integration_time_us: f64, power_mw: Option<f64>, shot: usize) -> Vec<f64> {
        let dark = Self::dark_level(integration_time_us);
        let center = PEAK_CENTER_NM + PEAK_DRIFT_NM * shot as f64;
        let amplitude = power_mw
            .map(|p| p * 50.0 * (integration_time_us / 100_000.0) * PEAK_FADE.powi(shot as i32))
            .unwrap_or(0.0);
        self.wavelengths
            .iter()
            .map(|&w| {
                let x = (w - center) / PEAK_WIDTH_NM;
                dark + amplitude * (-0.5 * x * x).exp()
            })
            .collect()
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn set_integration_time(&self, micros: u32) -> Result<()> {
        self.log.push(HardwareCall::SetIntegrationTime { micros });
        if micros == 0 {
            return Err(anyhow!("MockSpectrometer: integration time must be positive"));
        }
        self.integration_time_us
            .store(micros as usize, Ordering::SeqCst);
        Ok(())
    }

    async fn capture_intensities(&self) -> Result<Vec<f64>> {
        let emitting = match &self.laser {
            Some(state) => state.emitting.load(Ordering::SeqCst),
            None => false,
        };
        self.log.push(HardwareCall::Capture {
            illuminated: emitting,
        });

        let count = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_capture == Some(count) {
            return Err(anyhow!("MockSpectrometer: USB transfer timed out"));
        }

        let integration_time_us = self.integration_time_us.load(Ordering::SeqCst) as f64;
        if self.simulate_exposure {
            sleep(Duration::from_micros(integration_time_us as u64)).await;
        }

        let power_mw = match (&self.laser, emitting) {
            (Some(state), true) => Some(*state.power_mw.read().await),
            _ => None,
        };
        let shot = if emitting {
            self.illuminated_captures.fetch_add(1, Ordering::SeqCst)
        } else {
            0
        };

        let mut spectrum = self.expected_spectrum(integration_time_us, power_mw, shot);
        if let Some(noise) = &self.noise {
            let mut rng = noise.lock();
            let sigma = Self::dark_level(integration_time_us).sqrt();
            for value in spectrum.iter_mut() {
                // sum of uniforms, roughly normal
                let n: f64 = (0..4).map(|_| rng.gen_range(-1.0..1.0)).sum::<f64>() * 0.5;
                *value += sigma * n;
            }
        }
        Ok(spectrum)
    }

    async fn wavelengths(&self) -> Result<Vec<f64>> {
        self.log.push(HardwareCall::Wavelengths);
        Ok(self.wavelengths.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_laser_state() {
        let laser = MockLaser::new();
        assert!(!laser.is_emitting());

        laser.set_power(20.0).await.unwrap();
        laser.turn_on().await.unwrap();
        assert!(laser.is_emitting());
        assert_eq!(laser.query_power().await.unwrap(), 20.0);

        laser.turn_off().await.unwrap();
        assert!(!laser.is_emitting());
        assert_eq!(laser.call_log().calls().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_laser_power_range() {
        let laser = MockLaser::new();
        assert!(laser.set_power(-1.0).await.is_err());
        assert!(laser.set_power(500.0).await.is_err());
        assert_eq!(laser.power_mw().await, 0.0);
    }

    #[tokio::test]
    async fn test_mock_laser_fault_injection() {
        let laser = MockLaser::new().fail_on_power_change(2).failing_turn_off();
        laser.set_power(1.0).await.unwrap();
        assert!(laser.set_power(2.0).await.is_err());
        laser.set_power(3.0).await.unwrap();
        assert!(laser.turn_off().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_spectrometer_dark_vs_illuminated() {
        let laser = MockLaser::new();
        let spectrometer = MockSpectrometer::new()
            .illuminated_by(&laser)
            .without_noise();
        spectrometer.set_integration_time(100_000).await.unwrap();

        let dark = spectrometer.capture_intensities().await.unwrap();
        assert_eq!(dark.len(), MOCK_PIXELS);
        assert!(dark.iter().all(|&v| (v - DARK_COUNTS).abs() < 1e-9));

        laser.set_power(10.0).await.unwrap();
        laser.turn_on().await.unwrap();
        let bright = spectrometer.capture_intensities().await.unwrap();
        let max = bright.iter().cloned().fold(f64::MIN, f64::max);
        assert!(max > DARK_COUNTS + 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_spectrometer_exposure_timing() {
        let spectrometer = MockSpectrometer::new();
        spectrometer.set_integration_time(250_000).await.unwrap();

        let start = tokio::time::Instant::now();
        spectrometer.capture_intensities().await.unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(252),
            "Expected ~250ms, got {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_spectrometer_fail_on_capture() {
        let spectrometer = MockSpectrometer::new().fail_on_capture(2);
        spectrometer.capture_intensities().await.unwrap();
        assert!(spectrometer.capture_intensities().await.is_err());
        assert_eq!(spectrometer.capture_count(), 2);
    }

    #[tokio::test]
    async fn test_shared_call_log_orders_devices() {
        let log = CallLog::new();
        let laser = MockLaser::new().with_call_log(log.clone());
        let spectrometer = MockSpectrometer::new()
            .with_call_log(log.clone())
            .without_exposure_delay();

        laser.turn_off().await.unwrap();
        spectrometer.capture_intensities().await.unwrap();
        laser.turn_on().await.unwrap();

        assert_eq!(
            log.calls(),
            vec![
                HardwareCall::LaserOff,
                HardwareCall::Capture { illuminated: false },
                HardwareCall::LaserOn,
            ]
        );
    }
}
