//! [`SerialTelemetryLink`] – connection lifecycle of one sensor board.
//!
//! ```text
//!  connect() ──► Scanning ──probe ok──► Connected ──read error──► Disconnected
//!                   │                       │                         ▲
//!                   ├─ no match ────────────┼─────────────────────────┘
//!                   └─ enumeration error ─► Faulted      shutdown() ──┘
//! ```
//!
//! The link is driven from the owner's tick.  [`SerialTelemetryLink::tick`]
//! reaps a reader that died on its own and, while disconnected, advances a
//! reconnect scan by at most one candidate, so a single tick blocks for at
//! most one probe timeout.  Nothing on the tick side ever waits for the
//! reader thread except [`SerialTelemetryLink::shutdown`], whose wait is
//! bounded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use kinelink_hal::{DEFAULT_BAUD_RATE, PortProvider, PortSettings, SerialDevice};
use kinelink_types::{ConnectionState, KineError, RawSample};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::channel::{SamplePublisher, SampleSubscriber, sample_channel};
use crate::frame::{FrameCodec, FrameFormat};
use crate::probe::{ProbeOutcome, ProbeSettings, order_candidates, probe_candidates};
use crate::reader::{Counters, ReaderContext, ReaderHandle};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Link configuration.  All durations are upper bounds on blocking.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Bound on a single read; also the reader's stop-flag latency.
    pub read_timeout: Duration,
    /// Bound on probing one candidate port.
    pub probe_timeout: Duration,
    /// Complete lines examined per candidate.
    pub probe_lines: usize,
    /// Minimum delay between two reconnect passes started by `tick()`.  Zero
    /// starts a new pass as soon as the previous one is exhausted.
    pub reconnect_interval: Duration,
    /// Bound on the reader join in `shutdown()`.
    pub shutdown_timeout: Duration,
    /// Port tried before any enumerated one.
    pub port_hint: Option<String>,
    pub frame: FrameFormat,
    /// Token that identifies the firmware in a non-frame probe answer.
    pub probe_marker: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(1000),
            probe_lines: 2,
            reconnect_interval: Duration::ZERO,
            shutdown_timeout: Duration::from_millis(500),
            port_hint: None,
            frame: FrameFormat::proximity(5),
            probe_marker: None,
        }
    }
}

impl LinkConfig {
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            port: PortSettings {
                baud_rate: self.baud_rate,
                read_timeout: self.read_timeout,
            },
            probe_timeout: self.probe_timeout,
            probe_lines: self.probe_lines,
        }
    }

    fn codec(&self) -> Result<FrameCodec, KineError> {
        if self.baud_rate == 0 {
            return Err(KineError::InvalidConfig("baud_rate must be positive".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(KineError::InvalidConfig("read_timeout must be positive".to_string()));
        }
        let codec = FrameCodec::new(self.frame.clone())?;
        Ok(match &self.probe_marker {
            Some(marker) => codec.with_marker(marker.clone()),
            None => codec,
        })
    }
}

/// Point-in-time counters of one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    pub link_losses: u64,
    /// Successful connects, the first one included.
    pub connects: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Link
// ─────────────────────────────────────────────────────────────────────────────

/// Live serial connection to exactly one compatible device.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use kinelink_hal::sim::{SimPorts, SimScript};
/// use kinelink_link::{FrameFormat, LinkConfig, SerialTelemetryLink};
/// use kinelink_types::ConnectionState;
///
/// let ports = Arc::new(
///     SimPorts::builder()
///         .with_device("COM3", SimScript::lines(["0.5,0.0,9.8"]))
///         .build(),
/// );
/// let config = LinkConfig {
///     frame: FrameFormat::tilt(),
///     read_timeout: Duration::from_millis(5),
///     ..LinkConfig::default()
/// };
/// let mut link = SerialTelemetryLink::new(ports, config).unwrap();
///
/// assert_eq!(link.connect(None).unwrap(), ConnectionState::Connected);
/// assert_eq!(link.latest_sample().unwrap().primary(), Some(0.5));
/// link.shutdown();
/// ```
pub struct SerialTelemetryLink<P: PortProvider> {
    provider: P,
    config: LinkConfig,
    codec: FrameCodec,
    state: ConnectionState,
    /// Connected but not streaming: the link holds the handle itself.
    device: Option<Box<dyn SerialDevice>>,
    /// Streaming: the reader holds the handle.
    reader: Option<ReaderHandle>,
    port_name: Option<String>,
    last_port: Option<String>,
    publisher: Arc<SamplePublisher>,
    subscriber: SampleSubscriber,
    sequence: Arc<AtomicU64>,
    counters: Arc<Counters>,
    streaming_requested: bool,
    closed: bool,
    last_attempt: Option<Instant>,
    /// Reconnect pass in progress, one candidate probed per tick.
    scan: Option<ScanPass>,
}

/// Ordered candidates of one reconnect pass and the next one to probe.
#[derive(Debug)]
struct ScanPass {
    candidates: Vec<String>,
    next: usize,
}

impl<P: PortProvider> SerialTelemetryLink<P> {
    /// Create a disconnected link.  No port is touched until the first
    /// [`connect`](Self::connect) or [`tick`](Self::tick).
    ///
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] for an unusable configuration.
    pub fn new(provider: P, config: LinkConfig) -> Result<Self, KineError> {
        let codec = config.codec()?;
        let (publisher, subscriber) = sample_channel();
        Ok(Self {
            provider,
            config,
            codec,
            state: ConnectionState::Disconnected,
            device: None,
            reader: None,
            port_name: None,
            last_port: None,
            publisher: Arc::new(publisher),
            subscriber,
            sequence: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(Counters::default()),
            streaming_requested: false,
            closed: false,
            last_attempt: None,
            scan: None,
        })
    }

    /// Scan for the device and open it.
    ///
    /// `preferred_port_hint` (or the configured hint when `None`) is probed
    /// first, then every enumerated port in natural order.  Unlike
    /// [`tick`](Self::tick) this probes every candidate before returning.
    /// A link that is already connected is left as it is.
    ///
    /// # Errors
    ///
    /// - [`KineError::NoDeviceFound`] when no candidate answered; the state
    ///   is `Disconnected`.
    /// - [`KineError::PortEnumeration`] when the OS could not list ports;
    ///   the state is `Faulted`.
    #[instrument(skip(self), fields(baud = self.config.baud_rate))]
    pub fn connect(&mut self, preferred_port_hint: Option<&str>) -> Result<ConnectionState, KineError> {
        self.closed = false;
        self.scan = None;
        self.reap_reader();
        if self.state == ConnectionState::Connected {
            return Ok(self.state);
        }

        self.state = ConnectionState::Scanning;
        let hint = preferred_port_hint
            .map(str::to_string)
            .or_else(|| self.config.port_hint.clone());
        let candidates = self.candidates(hint.as_deref()).inspect_err(|e| {
            warn!(error = %e, "serial port enumeration failed");
        })?;
        debug!(candidates = ?candidates, "scanning serial ports");

        let probe = self.config.probe_settings();
        let Some(outcome) = probe_candidates(&self.provider, &candidates, &probe, &self.codec) else {
            self.state = ConnectionState::Disconnected;
            debug!(tried = candidates.len(), "no compatible serial device found");
            return Err(KineError::NoDeviceFound);
        };
        self.adopt(outcome);
        Ok(self.state)
    }

    /// Hand the Device Handle to a dedicated reader thread.
    ///
    /// The request is remembered: after a link loss and a successful
    /// reconnect from [`tick`](Self::tick), reading restarts automatically.
    /// Calling it while a reader is already running is a no-op.
    ///
    /// # Errors
    ///
    /// - [`KineError::NotConnected`] when no device is open.  Reading will
    ///   start on the next successful reconnect.
    /// - [`KineError::LinkLost`] when the OS refused to spawn the thread;
    ///   the handle is closed and the link is `Disconnected`.
    pub fn start_background_reading(&mut self) -> Result<(), KineError> {
        self.streaming_requested = true;
        if self.reader.is_some() {
            return Ok(());
        }
        let device = self.device.take().ok_or(KineError::NotConnected)?;
        let port = device.port_name().to_string();

        let ctx = ReaderContext {
            device,
            codec: self.codec.clone(),
            publisher: Arc::clone(&self.publisher),
            sequence: Arc::clone(&self.sequence),
            counters: Arc::clone(&self.counters),
        };
        match ReaderHandle::spawn(ctx) {
            Ok(reader) => {
                debug!(port = %port, "background reading started");
                self.reader = Some(reader);
                Ok(())
            }
            Err(e) => {
                warn!(port = %port, error = %e, "could not spawn serial reader");
                self.mark_disconnected();
                Err(KineError::LinkLost {
                    port,
                    reason: format!("reader thread: {e}"),
                })
            }
        }
    }

    /// Per-frame maintenance.  Returns the state after this tick.
    ///
    /// Reaps a reader that exited after a link loss.  While `Disconnected`
    /// or `Faulted` it starts a reconnect pass (at most once per
    /// `reconnect_interval`) and probes one candidate per call, reporting
    /// `Scanning` until the pass connects or runs out of candidates.  A
    /// single call therefore blocks for at most one probe timeout.  Does
    /// nothing after [`shutdown`](Self::shutdown) until the next explicit
    /// [`connect`](Self::connect).
    pub fn tick(&mut self) -> ConnectionState {
        self.reap_reader();
        if self.closed {
            return self.state;
        }
        if self.scan.is_none() {
            if !self.state.needs_reconnect() || !self.reconnect_due() {
                return self.state;
            }
            self.last_attempt = Some(Instant::now());
            let hint = self.config.port_hint.clone().or_else(|| self.last_port.clone());
            match self.candidates(hint.as_deref()) {
                Ok(candidates) => {
                    debug!(candidates = ?candidates, "reconnect pass started");
                    self.scan = Some(ScanPass { candidates, next: 0 });
                }
                Err(e) => {
                    debug!(error = %e, "reconnect pass could not enumerate ports");
                    return self.state;
                }
            }
        }
        self.advance_scan();
        self.state
    }
    /// Most recent sample.  Never blocks on the reader.
    pub fn latest_sample(&self) -> Option<Arc<RawSample>> {
        self.subscriber.latest()
    }

    /// Another read-only observer of the published samples.
    pub fn subscribe(&self) -> SampleSubscriber {
        self.publisher.subscribe()
    }

    /// Current state, including a link loss not yet reaped by `tick()`.
    pub fn state(&self) -> ConnectionState {
        match &self.reader {
            Some(reader) if reader.link_lost() => ConnectionState::Disconnected,
            _ => self.state,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Port of the open Device Handle.
    pub fn port_name(&self) -> Option<&str> {
        if self.is_connected() {
            self.port_name.as_deref()
        } else {
            None
        }
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            frames_accepted: self.counters.frames_accepted.load(Ordering::Relaxed),
            frames_rejected: self.counters.frames_rejected.load(Ordering::Relaxed),
            link_losses: self.counters.link_losses.load(Ordering::Relaxed),
            connects: self.counters.connects.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Stop the reader, close the Device Handle and stay `Disconnected`.
    ///
    /// The reader join is bounded by `shutdown_timeout`; a reader stuck past
    /// it is detached and exits after its current read.  Idempotent.
    pub fn shutdown(&mut self) {
        self.streaming_requested = false;
        self.closed = true;
        self.scan = None;
        if let Some(reader) = self.reader.take()
            && !reader.stop_within(self.config.shutdown_timeout)
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "serial reader did not stop in time, detaching it"
            );
        }
        if self.state != ConnectionState::Disconnected {
            info!(port = ?self.port_name, "serial link closed");
        }
        self.mark_disconnected();
    }

    // ── internals ────────────────────────────────────────────────────────────

    /// Enumerate and order the candidates; `Faulted` when listing fails.
    fn candidates(&mut self, hint: Option<&str>) -> Result<Vec<String>, KineError> {
        match self.provider.list_ports() {
            Ok(ports) => Ok(order_candidates(ports, hint)),
            Err(e) => {
                self.state = ConnectionState::Faulted;
                Err(e)
            }
        }
    }

    /// Probe the next candidate of the running pass.
    fn advance_scan(&mut self) {
        let Some(pass) = self.scan.as_mut() else {
            return;
        };
        let Some(port) = pass.candidates.get(pass.next).cloned() else {
            self.scan = None;
            self.state = ConnectionState::Disconnected;
            return;
        };
        pass.next += 1;
        let exhausted = pass.next >= pass.candidates.len();

        let probe = self.config.probe_settings();
        match probe_candidates(&self.provider, std::slice::from_ref(&port), &probe, &self.codec) {
            Some(outcome) => {
                self.scan = None;
                self.adopt(outcome);
                if self.streaming_requested
                    && let Err(e) = self.start_background_reading()
                {
                    warn!(error = %e, "could not resume background reading");
                }
            }
            None if exhausted => {
                self.scan = None;
                self.state = ConnectionState::Disconnected;
                debug!("reconnect pass found no compatible device");
            }
            None => self.state = ConnectionState::Scanning,
        }
    }

    /// Take ownership of a probed device and become `Connected`.
    fn adopt(&mut self, outcome: ProbeOutcome) {
        let port = outcome.device.port_name().to_string();
        if let Some(channels) = outcome.first_frame {
            self.publish(channels);
        }
        self.device = Some(outcome.device);
        self.port_name = Some(port.clone());
        self.last_port = Some(port.clone());
        self.state = ConnectionState::Connected;
        self.counters.connects.fetch_add(1, Ordering::Relaxed);
        info!(port = %port, state = %self.state, "serial link connected");
    }

    fn publish(&self, channels: Vec<f32>) {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.publisher.publish(RawSample::new(seq, channels));
        self.counters.frames_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Join a reader that has exited on its own.  A reader that flagged a
    /// loss has already released the device and is at most returning.
    fn reap_reader(&mut self) {
        let exited = |r: &ReaderHandle| r.link_lost() || r.is_finished();
        if !self.reader.as_ref().is_some_and(exited) {
            return;
        }
        if let Some(reader) = self.reader.take() {
            let lost = reader.link_lost();
            reader.join();
            if lost {
                info!(port = ?self.port_name, "serial link dropped, will rescan");
            }
            self.mark_disconnected();
        }
    }

    fn mark_disconnected(&mut self) {
        self.device = None;
        self.port_name = None;
        self.state = ConnectionState::Disconnected;
    }

    fn reconnect_due(&self) -> bool {
        self.config.reconnect_interval.is_zero()
            || self
                .last_attempt
                .is_none_or(|at| at.elapsed() >= self.config.reconnect_interval)
    }
}

impl<P: PortProvider> Drop for SerialTelemetryLink<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinelink_hal::sim::{SimPorts, SimScript};
    use std::thread;

    fn config() -> LinkConfig {
        LinkConfig {
            read_timeout: Duration::from_millis(2),
            probe_timeout: Duration::from_millis(40),
            shutdown_timeout: Duration::from_secs(1),
            frame: FrameFormat::tilt(),
            ..LinkConfig::default()
        }
    }

    fn streaming() -> SimScript {
        SimScript::generated(Duration::from_millis(1), |n| format!("{n},0.0,9.8"))
    }

    fn link(ports: &Arc<SimPorts>) -> SerialTelemetryLink<Arc<SimPorts>> {
        SerialTelemetryLink::new(Arc::clone(ports), config()).unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn default_config_probes_at_standard_baud() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        let probe = config.probe_settings();
        assert_eq!(probe.port.baud_rate, 115_200);
        assert_eq!(probe.probe_lines, 2);
    }

    #[test]
    fn invalid_config_rejected() {
        let ports = Arc::new(SimPorts::builder().build());
        let bad = LinkConfig {
            frame: FrameFormat::Csv { fields: 0 },
            ..config()
        };
        assert!(matches!(
            SerialTelemetryLink::new(Arc::clone(&ports), bad),
            Err(KineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn no_device_found_leaves_link_disconnected() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device("COM1", SimScript::silent())
                .with_device("COM2", SimScript::lines(["AT+OK"]))
                .build(),
        );
        let mut link = link(&ports);
        assert_eq!(link.connect(None), Err(KineError::NoDeviceFound));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.is_connected());
        assert!(link.latest_sample().is_none());
        assert_eq!(ports.open_handles(), 0);
    }

    #[test]
    fn enumeration_failure_is_faulted_and_retried() {
        let ports = Arc::new(SimPorts::builder().with_enumeration_failure().build());
        let mut link = link(&ports);
        assert!(matches!(link.connect(None), Err(KineError::PortEnumeration(_))));
        assert_eq!(link.state(), ConnectionState::Faulted);
        assert_eq!(link.tick(), ConnectionState::Faulted);
    }

    #[test]
    fn hint_is_preferred_over_enumeration_order() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device("COM1", SimScript::lines(["1,0,9.8"]))
                .with_device("COM2", SimScript::lines(["2,0,9.8"]))
                .build(),
        );
        let mut link = link(&ports);
        link.connect(Some("COM2")).unwrap();
        assert_eq!(link.port_name(), Some("COM2"));
        assert_eq!(ports.open_attempts("COM1"), 0);
        // The probe frame is published straight away.
        assert_eq!(link.latest_sample().unwrap().primary(), Some(2.0));
    }

    #[test]
    fn flaky_device_connects_on_third_tick_with_one_handle() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_flaky_device("COM3", 2, streaming())
                .build(),
        );
        let mut link = link(&ports);

        assert_eq!(link.tick(), ConnectionState::Disconnected);
        assert_eq!(link.tick(), ConnectionState::Disconnected);
        assert_eq!(link.tick(), ConnectionState::Connected);
        assert_eq!(ports.open_attempts("COM3"), 3);
        assert_eq!(link.stats().connects, 1);

        // Further ticks neither rescan nor open more handles.
        link.tick();
        assert_eq!(ports.open_attempts("COM3"), 3);
        assert!(ports.peak_open_handles() <= 1);
    }

    #[test]
    fn each_tick_probes_at_most_one_silent_port() {
        let mut builder = SimPorts::builder();
        for port in ["COM1", "COM2", "COM3", "COM4"] {
            builder = builder.with_device(port, SimScript::silent());
        }
        let ports = Arc::new(builder.build());
        let slow_probe = LinkConfig {
            probe_timeout: Duration::from_millis(100),
            ..config()
        };
        let mut link = SerialTelemetryLink::new(Arc::clone(&ports), slow_probe).unwrap();

        let mut states = Vec::new();
        for _ in 0..4 {
            let started = Instant::now();
            states.push(link.tick());
            // One probe timeout, well below the four a full scan would take.
            assert!(started.elapsed() < Duration::from_millis(300));
        }
        assert_eq!(
            states,
            [
                ConnectionState::Scanning,
                ConnectionState::Scanning,
                ConnectionState::Scanning,
                ConnectionState::Disconnected,
            ]
        );
        for port in ["COM1", "COM2", "COM3", "COM4"] {
            assert_eq!(ports.open_attempts(port), 1);
        }
    }

    #[test]
    fn reconnect_pass_finds_device_behind_silent_ports() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device("COM1", SimScript::silent())
                .with_device("COM2", SimScript::silent())
                .with_device("COM3", streaming())
                .build(),
        );
        let mut link = link(&ports);

        assert_eq!(link.tick(), ConnectionState::Scanning);
        assert_eq!(link.state(), ConnectionState::Scanning);
        assert!(!link.is_connected());
        assert_eq!(link.tick(), ConnectionState::Scanning);
        assert_eq!(link.tick(), ConnectionState::Connected);
        assert_eq!(link.port_name(), Some("COM3"));
        assert!(ports.peak_open_handles() <= 1);
    }

    #[test]
    fn explicit_connect_abandons_running_pass() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device("COM1", SimScript::silent())
                .with_device("COM2", streaming())
                .build(),
        );
        let mut link = link(&ports);
        assert_eq!(link.tick(), ConnectionState::Scanning);

        assert_eq!(link.connect(Some("COM2")), Ok(ConnectionState::Connected));
        link.tick();
        assert_eq!(ports.open_attempts("COM1"), 1);
        assert_eq!(link.port_name(), Some("COM2"));
    }

    #[test]
    fn background_reader_publishes_fresh_samples() {
        let ports = Arc::new(SimPorts::builder().with_device("COM3", streaming()).build());
        let mut link = link(&ports);
        let mut observer = link.subscribe();
        link.connect(None).unwrap();
        link.start_background_reading().unwrap();

        wait_for(|| link.latest_sample().is_some_and(|s| s.sequence() >= 5));
        let sample = link.latest_sample().unwrap();
        assert_eq!(sample.len(), 3);
        assert!(sample.age() < Duration::from_secs(1));
        assert!(observer.take_unseen().is_some());
        assert!(link.stats().frames_accepted >= 5);

        link.shutdown();
        assert_eq!(ports.open_handles(), 0);
    }

    #[test]
    fn malformed_line_keeps_previous_sample() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device("COM3", SimScript::lines(["1.0,0.0,9.8", "2.0,0.0,9.8", "3.5,abc,1.2"]))
                .build(),
        );
        let mut link = link(&ports);
        link.connect(None).unwrap();
        link.start_background_reading().unwrap();

        wait_for(|| link.stats().frames_rejected == 1);
        assert_eq!(link.latest_sample().unwrap().channels(), &[2.0, 0.0, 9.8]);
        assert!(link.is_connected());
    }

    #[test]
    fn reading_requested_while_disconnected_starts_after_connect() {
        let ports = Arc::new(SimPorts::builder().with_device("COM3", streaming()).build());
        let mut link = link(&ports);
        assert_eq!(link.start_background_reading(), Err(KineError::NotConnected));

        assert_eq!(link.tick(), ConnectionState::Connected);
        wait_for(|| link.stats().frames_accepted >= 3);
    }

    #[test]
    fn unplug_then_replug_reconnects_and_resumes_reading() {
        let ports = Arc::new(SimPorts::builder().with_device("COM3", streaming()).build());
        let mut link = link(&ports);
        link.connect(None).unwrap();
        link.start_background_reading().unwrap();
        wait_for(|| link.latest_sample().is_some());

        ports.unplug("COM3");
        wait_for(|| !link.is_connected());
        assert_eq!(link.port_name(), None);
        assert_eq!(link.tick(), ConnectionState::Disconnected);
        assert_eq!(link.stats().link_losses, 1);
        assert_eq!(ports.open_handles(), 0);

        ports.replug("COM3");
        wait_for(|| link.tick() == ConnectionState::Connected);
        let before = link.latest_sample().map_or(0, |s| s.sequence());
        wait_for(|| link.latest_sample().is_some_and(|s| s.sequence() > before + 2));

        assert_eq!(link.stats().connects, 2);
        assert!(ports.peak_open_handles() <= 1);
    }

    #[test]
    fn reconnect_interval_throttles_scans() {
        let ports = Arc::new(SimPorts::builder().with_device("COM3", SimScript::silent()).build());
        let throttled = LinkConfig {
            reconnect_interval: Duration::from_secs(3600),
            ..config()
        };
        let mut link = SerialTelemetryLink::new(Arc::clone(&ports), throttled).unwrap();

        link.tick();
        link.tick();
        assert_eq!(ports.open_attempts("COM3"), 1);
    }

    #[test]
    fn shutdown_is_bounded_and_idempotent() {
        let ports = Arc::new(SimPorts::builder().with_device("COM3", streaming()).build());
        let mut link = link(&ports);
        link.connect(None).unwrap();
        link.start_background_reading().unwrap();
        wait_for(|| link.latest_sample().is_some());

        let started = Instant::now();
        link.shutdown();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(ports.open_handles(), 0);
        assert_eq!(link.state(), ConnectionState::Disconnected);

        link.shutdown();
        // A closed link does not rescan on its own.
        assert_eq!(link.tick(), ConnectionState::Disconnected);
        assert_eq!(ports.open_attempts("COM3"), 1);
    }

    #[test]
    fn drop_closes_the_handle() {
        let ports = Arc::new(SimPorts::builder().with_device("COM3", streaming()).build());
        {
            let mut link = link(&ports);
            link.connect(None).unwrap();
            assert_eq!(ports.open_handles(), 1);
        }
        assert_eq!(ports.open_handles(), 0);
    }
}
