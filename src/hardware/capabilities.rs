//! Hardware Capabilities
//!
//! The acquisition loop talks to exactly two instruments, each through a small capability
//! trait:
//!
//! - [`LaserControl`]: emission on/off, CW power mode, output power
//! - [`Spectrometer`]: integration time, intensity capture, wavelength axis
//!
//! Concrete drivers (OBIS serial laser, mocks) implement these traits; the engine only
//! ever sees `Arc<dyn LaserControl>` and `Arc<dyn Spectrometer>`.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Returns only after the device acknowledged the request
//!
//! Settle delays after laser commands are NOT part of the capability contract. The
//! acquisition loop applies them, so every driver gets the same timing.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn dark_then_bright<L, S>(laser: &L, spectrometer: &S) -> Result<(Vec<f64>, Vec<f64>)>
//! where
//!     L: LaserControl,
//!     S: Spectrometer,
//! {
//!     laser.turn_off().await?;
//!     let dark = spectrometer.capture_intensities().await?;
//!     laser.set_power(5.0).await?;
//!     laser.turn_on().await?;
//!     let bright = spectrometer.capture_intensities().await?;
//!     laser.turn_off().await?;
//!     Ok((dark, bright))
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Laser Control
///
/// Continuous-wave laser with software emission control.
///
/// # Contract
/// - Power is given in milliwatts; drivers convert to the device's native unit
/// - Every call waits for the device acknowledgment before returning
/// - `turn_off` must be safe to call repeatedly (idempotent)
///
/// # Safety
/// CAUTION: `turn_on` creates an immediate optical hazard. The acquisition loop
/// guarantees a `turn_off` on every exit path once hardware has been touched.
#[async_trait]
pub trait LaserControl: Send + Sync {
    /// Enable emission
    async fn turn_on(&self) -> Result<()>;

    /// Disable emission
    async fn turn_off(&self) -> Result<()>;

    /// Select internal continuous-wave power regulation
    async fn set_cw_power_mode(&self) -> Result<()>;

    /// Set output power
    ///
    /// # Arguments
    /// * `milliwatts` - Target power in mW
    async fn set_power(&self, milliwatts: f64) -> Result<()>;

    /// Read the power setpoint back from the device, in mW
    async fn query_power(&self) -> Result<f64>;
}

/// Capability: Spectrometer
///
/// Single-channel array spectrometer.
///
/// # Contract
/// - Integration time is in microseconds and applies to the next capture
/// - `capture_intensities` blocks until the exposure is read out and returns one value
///   per pixel, aligned with `wavelengths`
/// - The wavelength axis is ascending and fixed for the lifetime of the connection
#[async_trait]
pub trait Spectrometer: Send + Sync {
    /// Set integration (exposure) time
    ///
    /// # Arguments
    /// * `micros` - Integration time in microseconds
    async fn set_integration_time(&self, micros: u32) -> Result<()>;

    /// Capture one spectrum (full device axis)
    async fn capture_intensities(&self) -> Result<Vec<f64>>;

    /// Full wavelength axis in nanometers
    async fn wavelengths(&self) -> Result<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingLaser {
        power_mw: Mutex<f64>,
        on: Mutex<bool>,
    }

    #[async_trait]
    impl LaserControl for RecordingLaser {
        async fn turn_on(&self) -> Result<()> {
            *self.on.lock().unwrap() = true;
            Ok(())
        }

        async fn turn_off(&self) -> Result<()> {
            *self.on.lock().unwrap() = false;
            Ok(())
        }

        async fn set_cw_power_mode(&self) -> Result<()> {
            Ok(())
        }

        async fn set_power(&self, milliwatts: f64) -> Result<()> {
            *self.power_mw.lock().unwrap() = milliwatts;
            Ok(())
        }

        async fn query_power(&self) -> Result<f64> {
            Ok(*self.power_mw.lock().unwrap())
        }
    }

    #[tokio::test]
    async fn test_laser_trait_object() {
        let laser: Box<dyn LaserControl> = Box::new(RecordingLaser {
            power_mw: Mutex::new(0.0),
            on: Mutex::new(false),
        });

        laser.set_power(20.0).await.unwrap();
        laser.turn_on().await.unwrap();
        assert_eq!(laser.query_power().await.unwrap(), 20.0);

        laser.turn_off().await.unwrap();
        laser.turn_off().await.unwrap();
    }
}
