//! Configuration Vault – reads/writes `~/.kinelink/config.toml`.
//!
//! ```toml
//! [link]
//! baud = 115200
//! read_timeout_ms = 100
//! probe_timeout_ms = 1000
//! port_hint = "/dev/ttyACM0"
//!
//! [link.frame]
//! kind = "named"
//! keys = ["s1", "s2", "s3", "s4", "s5"]
//!
//! [fusion]
//! channel_count = 5
//! min_range = 1.0
//! max_range = 35.0
//!
//! [control]
//! tick_hz = 60
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kinelink_link::{FrameFormat, LinkConfig};
use kinelink_types::{AxisBounds, ControlPoint, FusionParams};
use serde::{Deserialize, Serialize};

/// Persisted user configuration stored in `~/.kinelink/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub fusion: FusionParams,
    #[serde(default)]
    pub control: ControlSection,
}

/// `[link]` – serial port and framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSection {
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_lines")]
    pub probe_lines: usize,
    #[serde(default)]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_marker: Option<String>,
    #[serde(default = "default_frame")]
    pub frame: FrameFormat,
}

/// `[control]` – tick loop and input arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Samples older than this do not drive the controlled object.
    #[serde(default = "default_max_sample_age_ms")]
    pub max_sample_age_ms: u64,
    /// Pointer fallback position until the UI reports a move.
    #[serde(default)]
    pub pointer_x: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer_y: Option<f32>,
    /// Accelerometer range mapped onto `fusion.x_bounds` for comma-separated
    /// IMU frames.
    #[serde(default = "default_tilt_input")]
    pub tilt_input: AxisBounds,
}

fn default_baud() -> u32 {
    115_200
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_probe_timeout_ms() -> u64 {
    1000
}
fn default_probe_lines() -> usize {
    2
}
fn default_shutdown_timeout_ms() -> u64 {
    500
}
fn default_frame() -> FrameFormat {
    FrameFormat::proximity(5)
}
fn default_tick_hz() -> u32 {
    60
}
fn default_max_sample_age_ms() -> u64 {
    250
}
fn default_tilt_input() -> AxisBounds {
    AxisBounds::new(-1.0, 1.0)
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            baud: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_lines: default_probe_lines(),
            reconnect_interval_ms: 0,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            port_hint: None,
            probe_marker: None,
            frame: default_frame(),
        }
    }
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            max_sample_age_ms: default_max_sample_age_ms(),
            pointer_x: 0.0,
            pointer_y: None,
            tilt_input: default_tilt_input(),
        }
    }
}

impl LinkSection {
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            baud_rate: self.baud,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            probe_lines: self.probe_lines,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            port_hint: self.port_hint.clone(),
            frame: self.frame.clone(),
            probe_marker: self.probe_marker.clone(),
        }
    }
}

impl ControlSection {
    pub fn max_sample_age(&self) -> Duration {
        Duration::from_millis(self.max_sample_age_ms)
    }

    pub fn pointer(&self) -> ControlPoint {
        ControlPoint::new(self.pointer_x, self.pointer_y)
    }
}

/// Return the path to `~/.kinelink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".kinelink").join("config.toml")
}

/// Load the config with environment overrides applied.  A missing file
/// yields the defaults.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the file at `path`, `None` when it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.fusion.validate().map_err(|e| e.to_string())?;
    Ok(Some(cfg))
}

/// Apply `KINELINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KINELINK_PORT` | `link.port_hint` |
/// | `KINELINK_BAUD` | `link.baud` |
/// | `KINELINK_TICK_HZ` | `control.tick_hz` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Unparsable numeric values are ignored.
pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("KINELINK_PORT") {
        let port = port.trim();
        cfg.link.port_hint = (!port.is_empty()).then(|| port.to_string());
    }
    if let Some(baud) = lookup("KINELINK_BAUD").and_then(|v| v.trim().parse::<u32>().ok()) {
        cfg.link.baud = baud;
    }
    if let Some(hz) = lookup("KINELINK_TICK_HZ").and_then(|v| v.trim().parse::<u32>().ok()) {
        cfg.control.tick_hz = hz;
    }
}

/// Save the config to disk, creating `~/.kinelink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
