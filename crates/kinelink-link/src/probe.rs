//! Candidate ordering and bounded port probing.
//!
//! Probing is kept apart from OS enumeration: [`order_candidates`] turns an
//! enumeration result into a deterministic list, and [`probe_candidates`]
//! walks any such list against any [`PortProvider`].  Both are exercised in
//! tests with the simulated provider.
//!
//! A probe opens the port, reads at most `probe_lines` complete lines before
//! `probe_timeout` elapses and accepts the port when one of them matches the
//! [`FrameCodec`].  Allowing more than one line means a truncated first line
//! (the port was opened mid-frame) does not reject the right device.  Every
//! rejected handle is dropped, and therefore closed, before the next
//! candidate is opened.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use kinelink_hal::{PortInfo, PortProvider, PortSettings, SerialDevice};
use kinelink_types::KineError;
use tracing::{debug, info};

use crate::frame::FrameCodec;

/// Limits applied to each probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub port: PortSettings,
    /// Deadline for one candidate, measured from a successful open.
    pub probe_timeout: Duration,
    /// Complete lines examined per candidate before giving up.
    pub probe_lines: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            probe_timeout: Duration::from_millis(1000),
            probe_lines: 2,
        }
    }
}

/// A port that answered with the expected protocol.
pub struct ProbeOutcome {
    pub device: Box<dyn SerialDevice>,
    /// Channel values of the matching line, when it was a full frame rather
    /// than just a marker.
    pub first_frame: Option<Vec<f32>>,
}

impl std::fmt::Debug for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeOutcome")
            .field("port", &self.device.port_name())
            .field("first_frame", &self.first_frame)
            .finish()
    }
}

/// Order enumerated ports for probing.
///
/// The hint, when given, comes first whether or not it was enumerated (some
/// virtual ports are not listed).  The remaining ports follow in ascending
/// natural order of their identifiers (`COM2` before `COM10`), without
/// duplicates.
pub fn order_candidates(ports: Vec<PortInfo>, hint: Option<&str>) -> Vec<String> {
    let mut names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    names.sort_by(|a, b| natural_cmp(a, b));
    names.dedup();

    match hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => {
            names.retain(|n| n != hint);
            names.insert(0, hint.to_string());
            names
        }
        None => names,
    }
}

/// Compare identifiers by their non-numeric prefix, then by trailing number.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let split = |s: &str| {
        let digits = s.len() - s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (prefix, number) = s.split_at(s.len() - digits);
        (prefix.to_string(), number.parse::<u64>().ok())
    };
    let (pa, na) = split(a);
    let (pb, nb) = split(b);
    pa.cmp(&pb).then(na.cmp(&nb)).then_with(|| a.cmp(b))
}

/// Probe `candidates` in order and return the first matching device.
///
/// Failures are expected here (unrelated devices, busy ports) and are only
/// logged at debug level.
pub fn probe_candidates<P: PortProvider + ?Sized>(
    provider: &P,
    candidates: &[String],
    settings: &ProbeSettings,
    codec: &FrameCodec,
) -> Option<ProbeOutcome> {
    for port in candidates {
        match probe_port(provider, port, settings, codec) {
            Ok(outcome) => {
                info!(port = %port, "sensor board answered probe");
                return Some(outcome);
            }
            Err(e) => debug!(error = %e, "candidate rejected"),
        }
    }
    None
}

fn probe_port<P: PortProvider + ?Sized>(
    provider: &P,
    port: &str,
    settings: &ProbeSettings,
    codec: &FrameCodec,
) -> Result<ProbeOutcome, KineError> {
    let failed = |reason: String| KineError::PortProbeFailed {
        port: port.to_string(),
        reason,
    };

    let mut device = provider
        .open(port, &settings.port)
        .map_err(|e| failed(e.to_string()))?;

    let deadline = Instant::now() + settings.probe_timeout;
    let mut lines_seen = 0;
    while lines_seen < settings.probe_lines.max(1) && Instant::now() < deadline {
        match device.read_line() {
            Ok(Some(line)) => {
                lines_seen += 1;
                if codec.matches_probe(&line) {
                    return Ok(ProbeOutcome {
                        first_frame: codec.decode(&line).ok(),
                        device,
                    });
                }
                debug!(port, line = %line, "probe answer does not match protocol");
            }
            Ok(None) => {}
            Err(e) => return Err(failed(e.to_string())),
        }
    }

    Err(failed(if lines_seen == 0 {
        format!("no answer within {:?}", settings.probe_timeout)
    } else {
        format!("{lines_seen} line(s) without a matching frame")
    }))
}
