//! [`SystemPorts`] – [`PortProvider`] backed by the OS serial stack.

use kinelink_types::KineError;
use serialport::{SerialPortType, available_ports};
use tracing::{debug, instrument};

use crate::line::LineAssembler;
use crate::port::{PortInfo, PortProvider, PortSettings, SerialDevice};

/// Enumerates and opens real serial ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl SystemPorts {
    pub fn new() -> Self {
        Self
    }
}

impl PortProvider for SystemPorts {
    fn list_ports(&self) -> Result<Vec<PortInfo>, KineError> {
        let ports = available_ports().map_err(|e| KineError::PortEnumeration(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    port_name: p.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                },
                _ => PortInfo::named(p.port_name),
            })
            .collect())
    }

    #[instrument(level = "debug", skip(self, settings), fields(baud = settings.baud_rate))]
    fn open(&self, port: &str, settings: &PortSettings) -> Result<Box<dyn SerialDevice>, KineError> {
        let handle = serialport::new(port, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| KineError::PortUnavailable {
                port: port.to_string(),
                details: e.to_string(),
            })?;
        debug!(port, "serial port opened");
        Ok(Box::new(SystemDevice {
            port_name: port.to_string(),
            lines: LineAssembler::new(handle),
        }))
    }
}

/// An open OS serial port.  Closed when dropped.
struct SystemDevice {
    port_name: String,
    lines: LineAssembler<Box<dyn serialport::SerialPort>>,
}

impl SerialDevice for SystemDevice {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn read_line(&mut self) -> Result<Option<String>, KineError> {
        self.lines.next_line().map_err(|e| KineError::LinkLost {
            port: self.port_name.clone(),
            reason: e.to_string(),
        })
    }
}
