use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a serial telemetry link.
///
/// `Disconnected → Scanning → Connected` on a successful probe,
/// `Scanning → Disconnected` when every candidate is exhausted,
/// `Scanning → Faulted` when the OS could not even enumerate ports, and
/// `Connected → Disconnected` on a read failure or an explicit close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connected,
    Faulted,
}

impl ConnectionState {
    /// `true` for the states from which a reconnect attempt may start.
    pub fn needs_reconnect(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Faulted => write!(f, "faulted"),
        }
    }
}

/// One decoded telemetry frame.
///
/// A sample is immutable once built.  The reader publishes it behind an
/// `Arc` and replaces it wholesale with the next one, so every observer sees
/// all channels of a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    sequence: u64,
    channels: Vec<f32>,
    captured_at: Instant,
}

impl RawSample {
    /// Build a sample captured now.
    pub fn new(sequence: u64, channels: Vec<f32>) -> Self {
        Self::captured(sequence, channels, Instant::now())
    }

    /// Build a sample with an explicit capture instant.
    pub fn captured(sequence: u64, channels: Vec<f32>, captured_at: Instant) -> Self {
        Self {
            sequence,
            channels,
            captured_at,
        }
    }

    /// Per-frame counter assigned by the reader, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn channels(&self) -> &[f32] {
        &self.channels
    }

    /// First field of the frame (e.g. `accY` for tilt sensors).
    pub fn primary(&self) -> Option<f32> {
        self.channels.first().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Freshness: time elapsed since the frame was decoded.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Closed interval onto which a normalized `[0, 1]` value is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisBounds {
    pub min: f32,
    pub max: f32,
}

impl AxisBounds {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Linear interpolation: `t = 0` → `min`, `t = 1` → `max`.
    pub fn lerp(&self, t: f32) -> f32 {
        self.min + (self.max - self.min) * t
    }

    pub fn midpoint(&self) -> f32 {
        self.lerp(0.5)
    }
}

/// What the mapper does with a point that lands closer than `min_spacing`
/// to the previously accepted one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacingPolicy {
    /// Emit the point with a small random offset on every axis.
    #[default]
    Jitter,
    /// Drop the point entirely.
    Suppress,
}

/// Configuration of the proximity-sensor fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    /// Number of sensor channels per frame (N).
    #[serde(default = "default_channel_count")]
    pub channel_count: usize,
    /// Readings at or below this value are treated as noise.
    #[serde(default = "default_min_range")]
    pub min_range: f32,
    /// Readings at or above this value are treated as out of range.
    #[serde(default = "default_max_range")]
    pub max_range: f32,
    /// Output bounds of the primary (cross-sensor) axis.
    #[serde(default = "default_x_bounds")]
    pub x_bounds: AxisBounds,
    /// Output bounds of the secondary (distance) axis; `None` for 1D output.
    #[serde(default)]
    pub y_bounds: Option<AxisBounds>,
    /// Minimum primary-axis distance between consecutive accepted points.
    #[serde(default = "default_min_spacing")]
    pub min_spacing: f32,
    #[serde(default = "default_jitter")]
    pub jitter_x: f32,
    #[serde(default = "default_jitter")]
    pub jitter_y: f32,
    #[serde(default)]
    pub spacing_policy: SpacingPolicy,
}

fn default_channel_count() -> usize {
    5
}
fn default_min_range() -> f32 {
    1.0
}
fn default_max_range() -> f32 {
    35.0
}
fn default_x_bounds() -> AxisBounds {
    AxisBounds::new(-8.0, 8.0)
}
fn default_min_spacing() -> f32 {
    0.05
}
fn default_jitter() -> f32 {
    0.02
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            channel_count: default_channel_count(),
            min_range: default_min_range(),
            max_range: default_max_range(),
            x_bounds: default_x_bounds(),
            y_bounds: None,
            min_spacing: default_min_spacing(),
            jitter_x: default_jitter(),
            jitter_y: default_jitter(),
            spacing_policy: SpacingPolicy::default(),
        }
    }
}

impl FusionParams {
    /// Check the parameters for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), KineError> {
        let invalid = |msg: String| -> Result<(), KineError> { Err(KineError::InvalidConfig(msg)) };

        if self.channel_count == 0 {
            return invalid("channel_count must be at least 1".to_string());
        }
        let scalars = [
            ("min_range", self.min_range),
            ("max_range", self.max_range),
            ("min_spacing", self.min_spacing),
            ("jitter_x", self.jitter_x),
            ("jitter_y", self.jitter_y),
            ("x_bounds.min", self.x_bounds.min),
            ("x_bounds.max", self.x_bounds.max),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return invalid(format!("{name} must be finite (got {value})"));
            }
        }
        if let Some(y) = self.y_bounds
            && !(y.min.is_finite() && y.max.is_finite())
        {
            return invalid("y_bounds must be finite".to_string());
        }
        if self.min_range >= self.max_range {
            return invalid(format!(
                "min_range ({}) must be below max_range ({})",
                self.min_range, self.max_range
            ));
        }
        if self.min_spacing < 0.0 {
            return invalid("min_spacing must not be negative".to_string());
        }
        if self.jitter_x < 0.0 || self.jitter_y < 0.0 {
            return invalid("jitter magnitudes must not be negative".to_string());
        }
        Ok(())
    }
}

/// Output of one fusion tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedPosition {
    /// Primary axis, interpolated across the sensor row.
    pub x: f32,
    /// Secondary axis derived from the nearest reading, when configured.
    pub y: Option<f32>,
}

/// A coordinate offered by one input source to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub x: f32,
    pub y: Option<f32>,
}

impl ControlPoint {
    pub const fn new(x: f32, y: Option<f32>) -> Self {
        Self { x, y }
    }

    pub const fn planar(x: f32, y: f32) -> Self {
        Self { x, y: Some(y) }
    }
}

impl From<FusedPosition> for ControlPoint {
    fn from(p: FusedPosition) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Error taxonomy shared by the HAL, the telemetry link and the runtime.
///
/// None of these are fatal to the host application: probe and parse errors
/// are recovered locally, link loss is recovered by the tick-level
/// reconnect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KineError {
    #[error("Probe failed on {port}: {reason}")]
    PortProbeFailed { port: String, reason: String },

    #[error("No compatible serial device found")]
    NoDeviceFound,

    #[error("Malformed frame: {0}")]
    FrameParse(String),

    #[error("Link lost on {port}: {reason}")]
    LinkLost { port: String, reason: String },

    #[error("Port {port} unavailable: {details}")]
    PortUnavailable { port: String, details: String },

    #[error("Serial port enumeration failed: {0}")]
    PortEnumeration(String),

    #[error("Link is not connected")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
