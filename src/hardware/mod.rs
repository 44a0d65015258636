//! Hardware layer
//!
//! - [`capabilities`]: the `LaserControl` and `Spectrometer` traits the acquisition loop
//!   is written against
//! - [`obis`]: Coherent OBIS CW laser over a serial SCPI transport
//! - [`mock`]: simulated laser and spectrometer with call recording and fault injection

pub mod capabilities;
pub mod mock;
pub mod obis;

pub use capabilities::{LaserControl, Spectrometer};
pub use mock::{CallLog, HardwareCall, MockLaser, MockSpectrometer};
pub use obis::ObisLaser;
