//! Generic serial port traits.
//!
//! A [`PortProvider`] enumerates candidate ports and opens them; every
//! successful open yields one boxed [`SerialDevice`], the Device Handle.
//! Dropping the box closes the port.

use std::sync::Arc;
use std::time::Duration;

use kinelink_types::KineError;

/// Default line rate of the sensor firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Parameters applied when opening a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    /// Upper bound on a single blocking read.  Every read returns within
    /// roughly this interval even when the device is silent.
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Description of one enumerated port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortInfo {
    /// Platform identifier, e.g. `COM3` or `/dev/ttyACM0`.
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortInfo {
    pub fn named(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

/// One open serial connection (the Device Handle).
pub trait SerialDevice: Send {
    /// Identifier of the port this handle was opened on.
    fn port_name(&self) -> &str;

    /// Block for at most the read timeout waiting for one complete line.
    ///
    /// Returns `Ok(Some(line))` without the line terminator, `Ok(None)` when
    /// the timeout elapsed before a full line arrived (partial bytes are
    /// kept for the next call).
    ///
    /// # Errors
    ///
    /// Returns [`KineError::LinkLost`] when the device went away (unplugged,
    /// closed by the driver, stream ended).
    fn read_line(&mut self) -> Result<Option<String>, KineError>;
}

/// Enumerates and opens serial ports.
pub trait PortProvider: Send + Sync {
    /// List the ports currently present on the system, in any order.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::PortEnumeration`] when the OS query fails.
    fn list_ports(&self) -> Result<Vec<PortInfo>, KineError>;

    /// Open `port` with `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::PortUnavailable`] when the port cannot be opened
    /// (busy, missing, permission denied, …).
    fn open(&self, port: &str, settings: &PortSettings) -> Result<Box<dyn SerialDevice>, KineError>;
}

impl<P: PortProvider + ?Sized> PortProvider for Arc<P> {
    fn list_ports(&self) -> Result<Vec<PortInfo>, KineError> {
        (**self).list_ports()
    }

    fn open(&self, port: &str, settings: &PortSettings) -> Result<Box<dyn SerialDevice>, KineError> {
        (**self).open(port, settings)
    }
}
