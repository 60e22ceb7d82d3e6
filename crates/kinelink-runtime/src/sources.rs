//! Concrete [`InputSource`]s.
//!
//! | Source | Fresh when |
//! |---|---|
//! | [`VisionSource`] | toggled on and the last centroid is younger than its max age |
//! | [`TelemetrySource`] | link connected, sample younger than `max_sample_age`, mapper yields a point |
//! | [`PointerSource`] | always |
//!
//! Vision and pointer coordinates arrive from other threads (tracker, UI) and
//! are handed over through `tokio::sync::watch` channels, the same latest-value
//! hand-off the serial link uses for its samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use kinelink_hal::PortProvider;
use kinelink_link::SerialTelemetryLink;
use kinelink_perception::{SensorFusionMapper, TiltMapper};
use kinelink_types::{ConnectionState, ControlPoint, RawSample};
use tokio::sync::watch;
use tracing::debug;

use crate::arbiter::InputSource;

// ─────────────────────────────────────────────────────────────────────────────
// Vision
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Centroid {
    point: ControlPoint,
    observed_at: Instant,
}

/// Create the producer / consumer ends of a vision tracker feed.
///
/// The source starts toggled off.
pub fn vision_channel(max_age: Duration) -> (VisionFeed, VisionSource) {
    let (tx, rx) = watch::channel(None);
    let source = VisionSource {
        rx,
        toggle: VisionToggle(Arc::new(AtomicBool::new(false))),
        max_age,
    };
    (VisionFeed { tx }, source)
}

/// Producer side, owned by the tracker.
#[derive(Debug)]
pub struct VisionFeed {
    tx: watch::Sender<Option<Centroid>>,
}

impl VisionFeed {
    /// Report a centroid observed now.
    pub fn publish(&self, point: ControlPoint) {
        self.publish_at(point, Instant::now());
    }

    pub fn publish_at(&self, point: ControlPoint, observed_at: Instant) {
        self.tx.send_replace(Some(Centroid { point, observed_at }));
    }

    /// The tracker lost its target.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

/// User-facing on/off switch for the vision source.
#[derive(Debug, Clone)]
pub struct VisionToggle(Arc<AtomicBool>);

impl VisionToggle {
    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Consumer side of the vision feed.
#[derive(Debug)]
pub struct VisionSource {
    rx: watch::Receiver<Option<Centroid>>,
    toggle: VisionToggle,
    max_age: Duration,
}

impl VisionSource {
    pub fn toggle(&self) -> VisionToggle {
        self.toggle.clone()
    }
}

impl InputSource for VisionSource {
    fn name(&self) -> &str {
        "vision"
    }

    fn poll(&mut self) -> Option<ControlPoint> {
        if !self.toggle.is_enabled() {
            return None;
        }
        let centroid = (*self.rx.borrow())?;
        (centroid.observed_at.elapsed() <= self.max_age).then_some(centroid.point)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serial telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Turns a raw telemetry frame into a control coordinate.
pub trait SampleMapper: Send {
    fn map_sample(&mut self, sample: &RawSample) -> Option<ControlPoint>;
}

impl SampleMapper for SensorFusionMapper {
    fn map_sample(&mut self, sample: &RawSample) -> Option<ControlPoint> {
        self.fuse(sample).map(ControlPoint::from)
    }
}

impl SampleMapper for TiltMapper {
    fn map_sample(&mut self, sample: &RawSample) -> Option<ControlPoint> {
        self.map(sample).map(|x| ControlPoint::new(x, None))
    }
}

/// The serial link paired with a mapper.
///
/// `service()` drives [`SerialTelemetryLink::tick`], so reconnect attempts
/// continue whichever source is currently selected.
pub struct TelemetrySource<P: PortProvider, M: SampleMapper> {
    link: SerialTelemetryLink<P>,
    mapper: M,
    max_sample_age: Duration,
    last_state: ConnectionState,
}

impl<P: PortProvider, M: SampleMapper> TelemetrySource<P, M> {
    pub fn new(link: SerialTelemetryLink<P>, mapper: M, max_sample_age: Duration) -> Self {
        let last_state = link.state();
        Self {
            link,
            mapper,
            max_sample_age,
            last_state,
        }
    }

    pub fn link(&self) -> &SerialTelemetryLink<P> {
        &self.link
    }
}

impl<P: PortProvider, M: SampleMapper> InputSource for TelemetrySource<P, M> {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn service(&mut self) {
        let state = self.link.tick();
        if state != self.last_state {
            debug!(from = %self.last_state, to = %state, "telemetry link state changed");
            self.last_state = state;
        }
    }

    fn poll(&mut self) -> Option<ControlPoint> {
        if !self.link.is_connected() {
            return None;
        }
        let sample = self.link.latest_sample()?;
        if sample.age() > self.max_sample_age {
            return None;
        }
        self.mapper.map_sample(&sample)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pointer
// ─────────────────────────────────────────────────────────────────────────────

/// Create the UI / arbiter ends of the pointer fallback.
pub fn pointer_channel(initial: ControlPoint) -> (PointerFeed, PointerSource) {
    let (tx, rx) = watch::channel(initial);
    (PointerFeed { tx }, PointerSource { rx })
}

/// Updated by the UI on every pointer move.
#[derive(Debug)]
pub struct PointerFeed {
    tx: watch::Sender<ControlPoint>,
}

impl PointerFeed {
    pub fn move_to(&self, point: ControlPoint) {
        self.tx.send_replace(point);
    }
}

/// Last known pointer position.  Always available.
#[derive(Debug)]
pub struct PointerSource {
    rx: watch::Receiver<ControlPoint>,
}

impl PointerSource {
    pub fn current(&self) -> ControlPoint {
        *self.rx.borrow()
    }
}

impl InputSource for PointerSource {
    fn name(&self) -> &str {
        "pointer"
    }

    fn poll(&mut self) -> Option<ControlPoint> {
        Some(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinelink_hal::sim::{SimPorts, SimScript};
    use kinelink_link::{FrameFormat, LinkConfig};
    use kinelink_types::{AxisBounds, FusionParams};
    use std::thread;

    fn link_config(frame: FrameFormat) -> LinkConfig {
        LinkConfig {
            read_timeout: Duration::from_millis(2),
            probe_timeout: Duration::from_millis(40),
            frame,
            ..LinkConfig::default()
        }
    }

    fn quiet_fusion() -> SensorFusionMapper {
        let params = FusionParams {
            jitter_x: 0.0,
            jitter_y: 0.0,
            ..FusionParams::default()
        };
        SensorFusionMapper::with_seed(params, 1).unwrap()
    }

    #[test]
    fn vision_requires_toggle_and_fresh_centroid() {
        let (feed, mut vision) = vision_channel(Duration::from_millis(100));
        let toggle = vision.toggle();
        feed.publish(ControlPoint::planar(1.0, 2.0));
        assert!(!toggle.is_enabled());
        assert!(vision.poll().is_none());

        toggle.set_enabled(true);
        assert!(vision.toggle().is_enabled());
        assert_eq!(vision.poll(), Some(ControlPoint::planar(1.0, 2.0)));

        let stale = Instant::now() - Duration::from_millis(500);
        feed.publish_at(ControlPoint::planar(3.0, 3.0), stale);
        assert!(vision.poll().is_none());

        feed.publish(ControlPoint::planar(4.0, 4.0));
        feed.clear();
        assert!(vision.poll().is_none());
    }

    #[test]
    fn pointer_tracks_latest_move() {
        let (feed, mut pointer) = pointer_channel(ControlPoint::new(0.0, None));
        assert_eq!(pointer.poll(), Some(ControlPoint::new(0.0, None)));
        feed.move_to(ControlPoint::new(5.0, None));
        assert_eq!(pointer.current(), ControlPoint::new(5.0, None));
    }

    #[test]
    fn telemetry_source_connects_through_service_and_fuses() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device(
                    "COM3",
                    SimScript::generated(Duration::from_millis(1), |_| {
                        "s1:40,s2:40,s3:10,s4:40,s5:40".to_string()
                    }),
                )
                .build(),
        );
        let mut link = SerialTelemetryLink::new(Arc::clone(&ports), link_config(FrameFormat::proximity(5))).unwrap();
        // Requested before any device is known; starts on the first connect.
        assert!(link.start_background_reading().is_err());
        let mut source = TelemetrySource::new(link, quiet_fusion(), Duration::from_millis(500));

        assert!(source.poll().is_none());
        source.service();
        assert!(source.link().is_connected());

        let point = source.poll().unwrap();
        assert!(point.x.abs() < 1e-4);
        assert!(point.y.is_none());
    }

    #[test]
    fn telemetry_source_rejects_stale_samples() {
        let ports = Arc::new(
            SimPorts::builder()
                .with_device("COM3", SimScript::lines(["0.5,0.0,9.8"]))
                .build(),
        );
        let link = SerialTelemetryLink::new(Arc::clone(&ports), link_config(FrameFormat::tilt())).unwrap();
        let tilt = TiltMapper::new(AxisBounds::new(-1.0, 1.0), AxisBounds::new(-8.0, 8.0)).unwrap();
        let mut source = TelemetrySource::new(link, tilt, Duration::from_millis(20));

        source.service();
        let point = source.poll().unwrap();
        assert!((point.x - 4.0).abs() < 1e-4);

        thread::sleep(Duration::from_millis(40));
        assert!(source.poll().is_none());
    }

    #[test]
    fn telemetry_source_yields_nothing_while_disconnected() {
        let ports = Arc::new(SimPorts::builder().build());
        let link = SerialTelemetryLink::new(Arc::clone(&ports), link_config(FrameFormat::tilt())).unwrap();
        let mut source = TelemetrySource::new(link, quiet_fusion(), Duration::from_millis(500));
        source.service();
        assert_eq!(source.link().state(), ConnectionState::Disconnected);
        assert!(source.poll().is_none());
    }
}
