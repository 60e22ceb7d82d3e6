//! `kinelink-hal` – serial hardware abstraction.
//!
//! The rest of the workspace never touches an OS serial port directly; it
//! talks to the [`PortProvider`] and [`SerialDevice`] traits so that real
//! hardware and the in-process simulator are interchangeable.
//!
//! # Modules
//!
//! - [`port`] – the [`PortProvider`] / [`SerialDevice`] traits plus
//!   [`PortSettings`] and [`PortInfo`].
//! - [`line`] – [`LineAssembler`][line::LineAssembler]: turns a timeout-driven
//!   byte stream into complete newline-terminated frames, keeping partial
//!   lines across read timeouts.
//! - [`system`] – [`SystemPorts`][system::SystemPorts]: the
//!   [`serialport`]-backed provider used on real machines.
//! - [`sim`] – [`SimPorts`][sim::SimPorts]: scripted devices for tests and
//!   headless demos (failing opens, silent ports, hot-unplug).

pub mod line;
pub mod port;
pub mod sim;
pub mod system;

pub use line::{LineAssembler, MAX_LINE_LENGTH};
pub use port::{DEFAULT_BAUD_RATE, PortInfo, PortProvider, PortSettings, SerialDevice};
pub use sim::{SimPorts, SimScript};
pub use system::SystemPorts;
