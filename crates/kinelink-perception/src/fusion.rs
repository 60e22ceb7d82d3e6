//! Proximity Sensor Fusion.
//!
//! Fuses a row of N distance sensors (channel `i` mounted at position `i`)
//! into one continuous coordinate.  A hand or paddle in front of the row is
//! seen by a few neighbouring sensors; the nearer a sensor reads, the more it
//! pulls the estimate towards its own index:
//!
//! ```text
//! active(i)  ⇔  min_range < d_i < max_range
//! w_i        =  1 / max(d_i, 1)
//! index      =  Σ w_i · i / Σ w_i              ∈ [0, N − 1]
//! x          =  lerp(x_bounds, index / (N − 1))
//! y          =  lerp(y_bounds, (min d_i − min_range) / (max_range − min_range))
//! ```
//!
//! Consecutive points closer than `min_spacing` on the primary axis are
//! either nudged by a small uniform jitter (default) or dropped, depending
//! on the [`SpacingPolicy`].
//!
//! # Example
//!
//! ```rust
//! use kinelink_perception::fusion::SensorFusionMapper;
//! use kinelink_types::{FusionParams, RawSample};
//!
//! let mut mapper = SensorFusionMapper::with_seed(FusionParams::default(), 7).unwrap();
//!
//! // Only the middle sensor of five sees something.
//! let sample = RawSample::new(1, vec![40.0, 40.0, 10.0, 40.0, 40.0]);
//! let pos = mapper.fuse(&sample).unwrap();
//! assert!(pos.x.abs() < 1e-5);
//! ```

use kinelink_types::{FusedPosition, FusionParams, KineError, RawSample, SpacingPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

// ────────────────────────────────────────────────────────────────────────────
// Weighting
// ────────────────────────────────────────────────────────────────────────────

/// Distances below this are weighted as if they were this value.
const WEIGHT_FLOOR: f32 = 1.0;

struct ActiveSet {
    weighted_index: f32,
    nearest: f32,
}

fn is_active(d: f32, min_range: f32, max_range: f32) -> bool {
    d.is_finite() && d > min_range && d < max_range
}

fn summarize(readings: &[f32], min_range: f32, max_range: f32) -> Option<ActiveSet> {
    let mut weight_sum = 0.0f32;
    let mut weighted = 0.0f32;
    let mut nearest = f32::INFINITY;

    for (i, &d) in readings.iter().enumerate() {
        if !is_active(d, min_range, max_range) {
            continue;
        }
        let w = 1.0 / d.max(WEIGHT_FLOOR);
        weight_sum += w;
        weighted += w * i as f32;
        nearest = nearest.min(d);
    }

    (weight_sum > 0.0).then(|| ActiveSet {
        weighted_index: weighted / weight_sum,
        nearest,
    })
}

/// Inverse-distance weighted sensor index of `readings`, or `None` when no
/// reading lies strictly inside `(min_range, max_range)`.
///
/// The result always lies in `[0, readings.len() − 1]`.
pub fn weighted_index(readings: &[f32], min_range: f32, max_range: f32) -> Option<f32> {
    summarize(readings, min_range, max_range).map(|a| a.weighted_index)
}

// ────────────────────────────────────────────────────────────────────────────
// SensorFusionMapper
// ────────────────────────────────────────────────────────────────────────────

/// Stateful N-sensor fusion.
///
/// The only state carried between ticks is the last accepted primary
/// coordinate (for spacing) and the jitter RNG.
#[derive(Debug)]
pub struct SensorFusionMapper {
    params: FusionParams,
    rng: StdRng,
    last_accepted_x: Option<f32>,
}

impl SensorFusionMapper {
    /// Create a mapper with an entropy-seeded jitter source.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] when `params` fail validation.
    pub fn new(params: FusionParams) -> Result<Self, KineError> {
        params.validate()?;
        Ok(Self {
            params,
            rng: StdRng::from_entropy(),
            last_accepted_x: None,
        })
    }

    /// Create a mapper whose jitter sequence is reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] when `params` fail validation.
    pub fn with_seed(params: FusionParams, seed: u64) -> Result<Self, KineError> {
        params.validate()?;
        Ok(Self {
            params,
            rng: StdRng::seed_from_u64(seed),
            last_accepted_x: None,
        })
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    /// Pre-jitter primary coordinate of the last emitted point.
    pub fn last_accepted_x(&self) -> Option<f32> {
        self.last_accepted_x
    }

    /// Replace the parameters between sessions.  Clears spacing history.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] and keeps the previous
    /// parameters when `params` fail validation.
    pub fn reconfigure(&mut self, params: FusionParams) -> Result<(), KineError> {
        params.validate()?;
        self.params = params;
        self.reset();
        Ok(())
    }

    /// Forget the last accepted point.
    pub fn reset(&mut self) {
        self.last_accepted_x = None;
    }

    /// Fuse one frame into a position.
    ///
    /// Returns `None` when no channel is in range (the caller keeps its
    /// previous position) or, under [`SpacingPolicy::Suppress`], when the
    /// point is too close to the previous one.  Channels beyond
    /// `channel_count` are ignored; missing ones count as inactive.
    pub fn fuse(&mut self, sample: &RawSample) -> Option<FusedPosition> {
        let n = self.params.channel_count;
        let channels = sample.channels();
        if channels.len() != n {
            trace!(
                sequence = sample.sequence(),
                expected = n,
                got = channels.len(),
                "frame width differs from channel count"
            );
        }
        let readings = &channels[..channels.len().min(n)];

        let active = summarize(readings, self.params.min_range, self.params.max_range)?;

        let normalized = if n > 1 {
            (active.weighted_index / (n - 1) as f32).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let x = self.params.x_bounds.lerp(normalized);

        let y = self.params.y_bounds.map(|bounds| {
            let span = self.params.max_range - self.params.min_range;
            let t = ((active.nearest - self.params.min_range) / span).clamp(0.0, 1.0);
            bounds.lerp(t)
        });

        let too_close = self
            .last_accepted_x
            .is_some_and(|last| (x - last).abs() < self.params.min_spacing);

        let position = if too_close {
            match self.params.spacing_policy {
                SpacingPolicy::Suppress => {
                    trace!(sequence = sample.sequence(), x, "point within min_spacing, suppressed");
                    return None;
                }
                SpacingPolicy::Jitter => {
                    let jx = self.params.jitter_x;
                    let jy = self.params.jitter_y;
                    FusedPosition {
                        x: x + self.jitter(jx),
                        y: y.map(|y| y + self.jitter(jy)),
                    }
                }
            }
        } else {
            FusedPosition { x, y }
        };

        self.last_accepted_x = Some(x);
        Some(position)
    }

    fn jitter(&mut self, magnitude: f32) -> f32 {
        if magnitude > 0.0 {
            self.rng.gen_range(-magnitude..=magnitude)
        } else {
            0.0
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
