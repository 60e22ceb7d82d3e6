//! [`SimPorts`] – in-process serial devices for CI and headless demos.
//!
//! Each simulated port replays a [`SimScript`]: a fixed list of lines,
//! optionally followed by an endless generator, then either silence or a
//! simulated unplug.  The provider also models the failure modes the
//! telemetry link has to survive.
//!
//! | Behaviour | Builder call |
//! |---|---|
//! | Device answering with frames | [`SimPortsBuilder::with_device`] |
//! | Device whose first `n` opens fail | [`SimPortsBuilder::with_flaky_device`] |
//! | Port that never opens (busy, permissions) | [`SimPortsBuilder::with_unopenable`] |
//! | OS enumeration failure | [`SimPortsBuilder::with_enumeration_failure`] |
//! | Cable pull / replug at runtime | [`SimPorts::unplug`] / [`SimPorts::replug`] |
//!
//! Open handles are counted so tests can assert that a link never holds
//! more than one Device Handle at a time.
//!
//! # Example
//!
//! ```rust
//! use kinelink_hal::sim::{SimPorts, SimScript};
//! use kinelink_hal::{PortProvider, PortSettings, SerialDevice};
//!
//! let ports = SimPorts::builder()
//!     .with_device("COM3", SimScript::lines(["1.5,0.0,9.8"]))
//!     .build();
//!
//! let mut dev = ports.open("COM3", &PortSettings::default()).unwrap();
//! assert_eq!(dev.read_line().unwrap().as_deref(), Some("1.5,0.0,9.8"));
//! assert_eq!(ports.open_handles(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kinelink_types::KineError;

use crate::port::{PortInfo, PortProvider, PortSettings, SerialDevice};

/// Produces the `n`-th generated line (starting at 1).
pub type LineGenerator = Arc<dyn Fn(u64) -> String + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Script
// ─────────────────────────────────────────────────────────────────────────────

/// What a simulated device does once its scripted lines run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exhausted {
    /// Stay open but silent; every read times out.
    #[default]
    Idle,
    /// Fail the next read as if the cable had been pulled.
    Disconnect,
}

/// Line script replayed by every handle opened on a simulated port.
#[derive(Clone, Default)]
pub struct SimScript {
    lines: Vec<String>,
    generator: Option<LineGenerator>,
    line_interval: Duration,
    on_exhausted: Exhausted,
}

impl SimScript {
    /// Replay `lines` once, then go silent.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A port that opens but never sends anything.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Emit `generator(n)` forever, one line every `interval`.
    pub fn generated(interval: Duration, generator: impl Fn(u64) -> String + Send + Sync + 'static) -> Self {
        Self {
            generator: Some(Arc::new(generator)),
            line_interval: interval,
            ..Self::default()
        }
    }

    /// Fail reads once the scripted lines are exhausted.
    pub fn then_disconnect(mut self) -> Self {
        self.on_exhausted = Exhausted::Disconnect;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

struct SimPortSpec {
    name: String,
    script: SimScript,
    failing_opens: usize,
    openable: bool,
    plugged: Arc<AtomicBool>,
}

#[derive(Default)]
struct Counters {
    open_handles: AtomicUsize,
    peak_open_handles: AtomicUsize,
    open_attempts: Mutex<HashMap<String, usize>>,
}

/// Scripted [`PortProvider`].  Build with [`SimPorts::builder`].
pub struct SimPorts {
    ports: Vec<SimPortSpec>,
    enumeration_fails: bool,
    counters: Arc<Counters>,
}

impl SimPorts {
    pub fn builder() -> SimPortsBuilder {
        SimPortsBuilder::default()
    }

    /// Handles currently open across all ports.
    pub fn open_handles(&self) -> usize {
        self.counters.open_handles.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open handles observed so far.
    pub fn peak_open_handles(&self) -> usize {
        self.counters.peak_open_handles.load(Ordering::SeqCst)
    }

    /// Number of `open` calls made for `port`, successful or not.
    pub fn open_attempts(&self, port: &str) -> usize {
        self.counters
            .open_attempts
            .lock()
            .map(|m| m.get(port).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Simulate pulling the cable: open handles fail their next read, the
    /// port disappears from enumeration and cannot be opened.
    pub fn unplug(&self, port: &str) {
        self.set_plugged(port, false);
    }

    /// Undo [`SimPorts::unplug`].
    pub fn replug(&self, port: &str) {
        self.set_plugged(port, true);
    }

    fn set_plugged(&self, port: &str, plugged: bool) {
        if let Some(entry) = self.ports.iter().find(|p| p.name == port) {
            entry.plugged.store(plugged, Ordering::SeqCst);
        }
    }

    fn record_attempt(&self, port: &str) -> usize {
        match self.counters.open_attempts.lock() {
            Ok(mut attempts) => {
                let n = attempts.entry(port.to_string()).or_insert(0);
                *n += 1;
                *n
            }
            Err(_) => 0,
        }
    }
}

impl PortProvider for SimPorts {
    fn list_ports(&self) -> Result<Vec<PortInfo>, KineError> {
        if self.enumeration_fails {
            return Err(KineError::PortEnumeration("simulated enumeration failure".to_string()));
        }
        Ok(self
            .ports
            .iter()
            .filter(|p| p.plugged.load(Ordering::SeqCst))
            .map(|p| PortInfo {
                port_name: p.name.clone(),
                product: Some("KineLink simulator".to_string()),
                ..PortInfo::default()
            })
            .collect())
    }

    fn open(&self, port: &str, settings: &PortSettings) -> Result<Box<dyn SerialDevice>, KineError> {
        let attempt = self.record_attempt(port);
        let unavailable = |details: &str| KineError::PortUnavailable {
            port: port.to_string(),
            details: details.to_string(),
        };

        let entry = self
            .ports
            .iter()
            .find(|p| p.name == port)
            .ok_or_else(|| unavailable("no such port"))?;
        if !entry.plugged.load(Ordering::SeqCst) {
            return Err(unavailable("device unplugged"));
        }
        if !entry.openable {
            return Err(unavailable("access denied"));
        }
        if attempt <= entry.failing_opens {
            return Err(unavailable("device busy"));
        }

        let open = self.counters.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_open_handles
            .fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(SimDevice {
            port_name: entry.name.clone(),
            lines: entry.script.lines.iter().cloned().collect(),
            generator: entry.script.generator.clone(),
            generated: 0,
            line_interval: entry.script.line_interval,
            read_timeout: settings.read_timeout,
            on_exhausted: entry.script.on_exhausted,
            plugged: entry.plugged.clone(),
            counters: self.counters.clone(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`SimPorts`].  Ports are listed in insertion order.
#[derive(Default)]
pub struct SimPortsBuilder {
    ports: Vec<SimPortSpec>,
    enumeration_fails: bool,
}

impl SimPortsBuilder {
    /// Add a device that opens on the first attempt and replays `script`.
    pub fn with_device(self, name: &str, script: SimScript) -> Self {
        self.with_flaky_device(name, 0, script)
    }

    /// Add a device whose first `failing_opens` open attempts fail.
    pub fn with_flaky_device(mut self, name: &str, failing_opens: usize, script: SimScript) -> Self {
        self.ports.push(SimPortSpec {
            name: name.to_string(),
            script,
            failing_opens,
            openable: true,
            plugged: Arc::new(AtomicBool::new(true)),
        });
        self
    }

    /// Add a port that is listed but can never be opened.
    pub fn with_unopenable(mut self, name: &str) -> Self {
        self.ports.push(SimPortSpec {
            name: name.to_string(),
            script: SimScript::silent(),
            failing_opens: 0,
            openable: false,
            plugged: Arc::new(AtomicBool::new(true)),
        });
        self
    }

    /// Make every `list_ports` call fail.
    pub fn with_enumeration_failure(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    pub fn build(self) -> SimPorts {
        SimPorts {
            ports: self.ports,
            enumeration_fails: self.enumeration_fails,
            counters: Arc::new(Counters::default()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

struct SimDevice {
    port_name: String,
    lines: VecDeque<String>,
    generator: Option<LineGenerator>,
    generated: u64,
    line_interval: Duration,
    read_timeout: Duration,
    on_exhausted: Exhausted,
    plugged: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl SimDevice {
    fn lost(&self, reason: &str) -> KineError {
        KineError::LinkLost {
            port: self.port_name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl SerialDevice for SimDevice {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn read_line(&mut self) -> Result<Option<String>, KineError> {
        if !self.plugged.load(Ordering::SeqCst) {
            return Err(self.lost("device unplugged"));
        }
        if let Some(line) = self.lines.pop_front() {
            if !self.line_interval.is_zero() {
                thread::sleep(self.line_interval);
            }
            return Ok(Some(line));
        }
        if let Some(generator) = &self.generator {
            thread::sleep(self.line_interval);
            self.generated += 1;
            return Ok(Some(generator(self.generated)));
        }
        match self.on_exhausted {
            Exhausted::Idle => {
                thread::sleep(self.read_timeout);
                Ok(None)
            }
            Exhausted::Disconnect => Err(self.lost("end of script")),
        }
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.counters.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
