//! Coherent OBIS CW Laser Driver
//!
//! Reference: OBIS LX/LS Operator's Manual, SCPI command set
//!
//! Protocol Overview:
//! - Format: ASCII SCPI command/response over RS-232 (USB virtual COM port)
//! - Baud: 9600, 8N1, no flow control
//! - Terminator: CRLF (\r\n) on commands, one reply line per command
//! - Commands: SOUR:AM:STATE ON|OFF, SOUR:AM:INT CWP, SOUR:POW:LEV:IMM:AMPL <W>
//! - Queries: SOUR:POW:LEV:IMM:AMPL?, *IDN?
//!
//! Power is configured in milliwatts throughout the crate; the device expects watts, so
//! `set_power` divides by 1000 before transmission and `query_power` multiplies back.
//!
//! # Example Usage
//!
//! ```no_run
//! use pl_daq::hardware::obis::ObisLaser;
//! use pl_daq::hardware::capabilities::LaserControl;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let laser = ObisLaser::open("/dev/ttyUSB0", 9600, Duration::from_millis(100))?;
//!
//!     laser.set_cw_power_mode().await?;
//!     laser.set_power(20.0).await?;
//!     laser.turn_on().await?;
//!     println!("Setpoint: {:.3} mW", laser.query_power().await?);
//!     laser.turn_off().await?;
//!
//!     Ok(())
//! }
//! ```

use crate::hardware::capabilities::LaserControl;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Driver for Coherent OBIS CW lasers
///
/// Implements the [`LaserControl`] capability over any async byte transport. Use
/// [`ObisLaser::open`] for a real serial port and [`ObisLaser::with_transport`] for
/// anything else (in-memory transports in tests, TCP serial bridges).
pub struct ObisLaser<T> {
    /// Transport protected by Mutex for exclusive access
    port: Mutex<BufReader<T>>,
    /// Reply timeout per command
    timeout: Duration,
}

#[cfg(feature = "instrument_serial")]
impl ObisLaser<SerialStream> {
    /// Open the laser on a serial port
    ///
    /// # Arguments
    /// * `port_path` - Serial port path (e.g., "/dev/ttyUSB0", "COM6")
    /// * `baud_rate` - Communication speed (OBIS default: 9600)
    /// * `timeout` - Reply timeout per command
    ///
    /// # Errors
    /// Returns error if serial port cannot be opened
    pub fn open(port_path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open OBIS serial port {port_path}"))?;

        Ok(Self::with_transport(port, timeout))
    }
}

impl<T> ObisLaser<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open transport
    pub fn with_transport(transport: T, timeout: Duration) -> Self {
        Self {
            port: Mutex::new(BufReader::new(transport)),
            timeout,
        }
    }

    /// Query laser identity
    ///
    /// # Returns
    /// Manufacturer, model and serial number string
    pub async fn identify(&self) -> Result<String> {
        self.command("*IDN?").await
    }

    /// Send one command and read its reply line
    ///
    /// Replies starting with `ERR` are turned into errors.
    async fn command(&self, command: &str) -> Result<String> {
        let mut port = self.port.lock().await;

        let cmd = format!("{command}\r\n");
        port.get_mut()
            .write_all(cmd.as_bytes())
            .await
            .context("OBIS write failed")?;
        port.get_mut().flush().await.context("OBIS flush failed")?;
        debug!(command, "OBIS sent");

        let mut response = String::new();
        let read = tokio::time::timeout(self.timeout, port.read_line(&mut response))
            .await
            .with_context(|| format!("OBIS read timeout after {:?} ({command})", self.timeout))?
            .context("OBIS read failed")?;
        if read == 0 {
            return Err(anyhow!("OBIS closed the connection ({command})"));
        }

        let response = response.trim().to_string();
        debug!(command, response = %response, "OBIS reply");
        if response.starts_with("ERR") {
            return Err(anyhow!("OBIS rejected '{command}': {response}"));
        }
        Ok(response)
    }
}

#[async_trait]
impl<T> LaserControl for ObisLaser<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn turn_on(&self) -> Result<()> {
        self.command("SOUR:AM:STATE ON").await.map(|_| ())
    }

    async fn turn_off(&self) -> Result<()> {
        self.command("SOUR:AM:STATE OFF").await.map(|_| ())
    }

    async fn set_cw_power_mode(&self) -> Result<()> {
        self.command("SOUR:AM:INT CWP").await.map(|_| ())
    }

    async fn set_power(&self, milliwatts: f64) -> Result<()> {
        let watts = milliwatts / 1000.0;
        self.command(&format!("SOUR:POW:LEV:IMM:AMPL {watts}"))
            .await
            .map(|_| ())
    }

    async fn query_power(&self) -> Result<f64> {
        let response = self.command("SOUR:POW:LEV:IMM:AMPL?").await?;
        let watts: f64 = response
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse OBIS power reply '{response}'"))?;
        Ok(watts * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn laser(mock: tokio_test::io::Mock) -> ObisLaser<tokio_test::io::Mock> {
        ObisLaser::with_transport(mock, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_state_commands() {
        let mock = Builder::new()
            .write(b"SOUR:AM:INT CWP\r\n")
            .read(b"OK\r\n")
            .write(b"SOUR:AM:STATE ON\r\n")
            .read(b"OK\r\n")
            .write(b"SOUR:AM:STATE OFF\r\n")
            .read(b"OK\r\n")
            .build();
        let laser = laser(mock);

        laser.set_cw_power_mode().await.unwrap();
        laser.turn_on().await.unwrap();
        laser.turn_off().await.unwrap();
    }

    #[tokio::test]
    async fn test_power_is_sent_in_watts() {
        let mock = Builder::new()
            .write(b"SOUR:POW:LEV:IMM:AMPL 0.02\r\n")
            .read(b"OK\r\n")
            .write(b"SOUR:POW:LEV:IMM:AMPL 0.001\r\n")
            .read(b"OK\r\n")
            .build();
        let laser = laser(mock);

        laser.set_power(20.0).await.unwrap();
        laser.set_power(1.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_power_returns_milliwatts() {
        let mock = Builder::new()
            .write(b"SOUR:POW:LEV:IMM:AMPL?\r\n")
            .read(b"0.02000\r\n")
            .build();
        let laser = laser(mock);

        let power = laser.query_power().await.unwrap();
        assert!((power - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_error_reply_is_an_error() {
        let mock = Builder::new()
            .write(b"SOUR:AM:STATE ON\r\n")
            .read(b"ERR-400\r\n")
            .build();
        let laser = laser(mock);

        let err = laser.turn_on().await.unwrap_err();
        assert!(err.to_string().contains("ERR-400"));
    }

    #[tokio::test]
    async fn test_closed_connection_is_an_error() {
        let mock = Builder::new().write(b"SOUR:AM:STATE OFF\r\n").build();
        let laser = laser(mock);

        assert!(laser.turn_off().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reply_times_out() {
        let mock = Builder::new()
            .write(b"*IDN?\r\n")
            .wait(Duration::from_secs(5))
            .build();
        let laser = laser(mock);

        let err = laser.identify().await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }
}
