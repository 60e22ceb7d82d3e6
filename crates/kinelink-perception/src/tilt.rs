//! Single-axis tilt mapping for IMU boards (`accY,accX,accZ` frames).

use kinelink_types::{AxisBounds, KineError, RawSample};

/// Maps one channel linearly from an input range onto output bounds,
/// clamping at both ends.  An inverted input range flips the direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltMapper {
    channel: usize,
    input: AxisBounds,
    output: AxisBounds,
}

impl TiltMapper {
    /// Map channel 0 (`accY`) from `input` onto `output`.
    ///
    /// # Errors
    ///
    /// Returns [`KineError::InvalidConfig`] when the input range is empty or
    /// any bound is not finite.
    pub fn new(input: AxisBounds, output: AxisBounds) -> Result<Self, KineError> {
        let bounds = [input.min, input.max, output.min, output.max];
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(KineError::InvalidConfig("tilt bounds must be finite".to_string()));
        }
        if input.min == input.max {
            return Err(KineError::InvalidConfig(format!(
                "tilt input range is empty ({})",
                input.min
            )));
        }
        Ok(Self {
            channel: 0,
            input,
            output,
        })
    }

    /// Read a different channel of the frame.
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    /// Mapped value, or `None` when the channel is missing or not finite.
    pub fn map(&self, sample: &RawSample) -> Option<f32> {
        let value = *sample.channels().get(self.channel)?;
        if !value.is_finite() {
            return None;
        }
        let t = ((value - self.input.min) / (self.input.max - self.input.min)).clamp(0.0, 1.0);
        Some(self.output.lerp(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> TiltMapper {
        TiltMapper::new(AxisBounds::new(-1.0, 1.0), AxisBounds::new(-8.0, 8.0)).unwrap()
    }

    #[test]
    fn maps_and_clamps_primary_channel() {
        let m = mapper();
        let at = |v: f32| m.map(&RawSample::new(1, vec![v, 0.0, 9.8])).unwrap();
        assert!(at(0.0).abs() < 1e-6);
        assert!((at(0.5) - 4.0).abs() < 1e-5);
        assert!((at(3.0) - 8.0).abs() < 1e-6);
        assert!((at(-3.0) + 8.0).abs() < 1e-6);
    }

    #[test]
    fn inverted_input_flips_direction() {
        let m = TiltMapper::new(AxisBounds::new(1.0, -1.0), AxisBounds::new(0.0, 10.0)).unwrap();
        assert!((m.map(&RawSample::new(1, vec![1.0])).unwrap()).abs() < 1e-6);
    }

    #[test]
    fn missing_or_non_finite_channel_is_none() {
        let m = mapper().with_channel(2);
        assert!(m.map(&RawSample::new(1, vec![0.1, 0.2])).is_none());
        assert!(mapper().map(&RawSample::new(1, vec![f32::NAN])).is_none());
    }

    #[test]
    fn degenerate_ranges_rejected() {
        assert!(TiltMapper::new(AxisBounds::new(1.0, 1.0), AxisBounds::new(0.0, 1.0)).is_err());
        assert!(TiltMapper::new(AxisBounds::new(0.0, 1.0), AxisBounds::new(0.0, f32::INFINITY)).is_err());
    }
}
