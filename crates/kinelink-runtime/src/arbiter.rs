//! [`InputArbiter`] – fixed-priority input selection.
//!
//! Each tick every source is serviced first (so a lower-priority source can
//! keep reconnecting while a higher one drives), then polled in priority
//! order; the first fresh coordinate wins.  There is no blending: exactly
//! one source drives the controlled object per tick.
//!
//! # Example
//!
//! ```rust
//! use kinelink_runtime::arbiter::{ControlledObject, InputArbiter};
//! use kinelink_runtime::sources::{pointer_channel, vision_channel};
//! use kinelink_types::ControlPoint;
//! use std::time::Duration;
//!
//! struct Paddle(f32);
//! impl ControlledObject for Paddle {
//!     fn apply(&mut self, point: ControlPoint) {
//!         self.0 = point.x;
//!     }
//! }
//!
//! let (_feed, vision) = vision_channel(Duration::from_millis(200));
//! let (pointer_feed, pointer) = pointer_channel(ControlPoint::new(1.0, None));
//! let mut arbiter = InputArbiter::new(pointer).with_source(vision);
//!
//! let mut paddle = Paddle(0.0);
//! // Vision is toggled off, so the pointer drives.
//! assert_eq!(arbiter.tick(&mut paddle).source, "pointer");
//! assert_eq!(paddle.0, 1.0);
//!
//! pointer_feed.move_to(ControlPoint::new(-2.0, None));
//! arbiter.tick(&mut paddle);
//! assert_eq!(paddle.0, -2.0);
//! ```

use kinelink_types::ControlPoint;
use tracing::{info, trace};

use crate::sources::PointerSource;

// ─────────────────────────────────────────────────────────────────────────────
// Contracts
// ─────────────────────────────────────────────────────────────────────────────

/// One producer of control coordinates.
pub trait InputSource: Send {
    /// Stable label used in logs and [`Selection::source`].
    fn name(&self) -> &str;

    /// Per-tick housekeeping, called on every source before selection.
    fn service(&mut self) {}

    /// A fresh coordinate, or `None` when the source cannot drive this tick.
    fn poll(&mut self) -> Option<ControlPoint>;
}

/// The game object moved by the selected coordinate.
pub trait ControlledObject {
    fn apply(&mut self, point: ControlPoint);
}

/// Outcome of one arbitration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub source: &'a str,
    pub point: ControlPoint,
    /// `true` when no prioritized source had a coordinate.
    pub fallback: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// InputArbiter
// ─────────────────────────────────────────────────────────────────────────────

/// Prioritized sources plus an always-available pointer fallback.
pub struct InputArbiter {
    sources: Vec<Box<dyn InputSource>>,
    fallback: PointerSource,
    /// Index of the last selected source; `sources.len()` for the fallback.
    last_selected: Option<usize>,
}

impl InputArbiter {
    pub fn new(fallback: PointerSource) -> Self {
        Self {
            sources: Vec::new(),
            fallback,
            last_selected: None,
        }
    }

    /// Append a source below every source added before it.
    pub fn with_source(mut self, source: impl InputSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Source names in priority order, fallback last.
    pub fn priorities(&self) -> Vec<&str> {
        self.sources
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    /// Select this tick's coordinate without applying it.
    pub fn select(&mut self) -> Selection<'_> {
        for source in &mut self.sources {
            source.service();
        }
        self.fallback.service();

        let mut chosen = None;
        for (index, source) in self.sources.iter_mut().enumerate() {
            if let Some(point) = source.poll() {
                chosen = Some((index, point));
                break;
            }
        }
        let fallback_index = self.sources.len();
        let (index, point) = chosen.unwrap_or_else(|| (fallback_index, self.fallback.current()));

        if self.last_selected != Some(index) {
            let previous = self.last_selected.map(|i| self.name_at(i).to_string());
            info!(from = ?previous, to = self.name_at(index), "input source switched");
            self.last_selected = Some(index);
        }

        let source = self.name_at(index);
        trace!(source, x = point.x, y = ?point.y, "input selected");
        Selection {
            source,
            point,
            fallback: index == fallback_index,
        }
    }

    /// Select and forward the coordinate to `target`.
    pub fn tick(&mut self, target: &mut dyn ControlledObject) -> Selection<'_> {
        let selection = self.select();
        target.apply(selection.point);
        selection
    }

    fn name_at(&self, index: usize) -> &str {
        self.sources
            .get(index)
            .map_or_else(|| self.fallback.name(), |s| s.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::pointer_channel;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        point: Option<ControlPoint>,
        serviced: Arc<AtomicUsize>,
        polled: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, point: Option<ControlPoint>) -> Self {
            Self {
                name,
                point,
                serviced: Arc::new(AtomicUsize::new(0)),
                polled: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl InputSource for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn service(&mut self) {
            self.serviced.fetch_add(1, Ordering::SeqCst);
        }

        fn poll(&mut self) -> Option<ControlPoint> {
            self.polled.fetch_add(1, Ordering::SeqCst);
            self.point
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<ControlPoint>);

    impl ControlledObject for Recorder {
        fn apply(&mut self, point: ControlPoint) {
            self.0.push(point);
        }
    }

    fn pointer() -> PointerSource {
        pointer_channel(ControlPoint::new(0.0, None)).1
    }

    #[test]
    fn highest_priority_fresh_source_wins() {
        let mut arbiter = InputArbiter::new(pointer())
            .with_source(Fixed::new("vision", None))
            .with_source(Fixed::new("telemetry", Some(ControlPoint::new(3.0, None))))
            .with_source(Fixed::new("other", Some(ControlPoint::new(9.0, None))));

        let selection = arbiter.select();
        assert_eq!(selection.source, "telemetry");
        assert_eq!(selection.point.x, 3.0);
        assert!(!selection.fallback);
    }

    #[test]
    fn lower_sources_are_serviced_but_not_polled() {
        let high = Fixed::new("vision", Some(ControlPoint::new(1.0, None)));
        let low = Fixed::new("telemetry", Some(ControlPoint::new(2.0, None)));
        let (low_serviced, low_polled) = (Arc::clone(&low.serviced), Arc::clone(&low.polled));

        let mut arbiter = InputArbiter::new(pointer()).with_source(high).with_source(low);
        for _ in 0..3 {
            assert_eq!(arbiter.select().source, "vision");
        }
        assert_eq!(low_serviced.load(Ordering::SeqCst), 3);
        assert_eq!(low_polled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pointer_fallback_always_available() {
        let (feed, pointer) = pointer_channel(ControlPoint::new(0.5, Some(1.0)));
        let mut arbiter = InputArbiter::new(pointer).with_source(Fixed::new("vision", None));
        let mut target = Recorder::default();

        let selection = arbiter.tick(&mut target);
        assert_eq!(selection.source, "pointer");
        assert!(selection.fallback);

        feed.move_to(ControlPoint::new(-1.0, None));
        arbiter.tick(&mut target);
        assert_eq!(
            target.0,
            vec![ControlPoint::new(0.5, Some(1.0)), ControlPoint::new(-1.0, None)]
        );
    }

    #[test]
    fn exactly_one_point_applied_per_tick() {
        let mut arbiter = InputArbiter::new(pointer())
            .with_source(Fixed::new("a", Some(ControlPoint::new(1.0, None))))
            .with_source(Fixed::new("b", Some(ControlPoint::new(2.0, None))));
        let mut target = Recorder::default();
        for _ in 0..4 {
            arbiter.tick(&mut target);
        }
        assert_eq!(target.0.len(), 4);
        assert!(target.0.iter().all(|p| p.x == 1.0));
    }

    #[test]
    fn priorities_list_fallback_last() {
        let arbiter = InputArbiter::new(pointer())
            .with_source(Fixed::new("vision", None))
            .with_source(Fixed::new("telemetry", None));
        assert_eq!(arbiter.priorities(), ["vision", "telemetry", "pointer"]);
    }
}
