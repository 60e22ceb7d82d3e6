//! Simulated sensor board for `kinelink run --sim`.
//!
//! A target sweeps back and forth in front of the sensor row; every sensor
//! reports a distance growing with its offset from the target, and sensors
//! too far away report out of range.  Tilt boards report a sinusoidal
//! `accY` with a level device otherwise.

use std::time::Duration;

use kinelink_hal::sim::{SimPorts, SimScript};
use kinelink_link::FrameFormat;

pub const SIM_PORT: &str = "SIM0";

/// Firmware line rate of the simulated board.
const LINE_INTERVAL: Duration = Duration::from_millis(10);

/// Angular step of the sweep per emitted line.
const SWEEP_STEP: f32 = 0.02;

const OUT_OF_RANGE: f32 = 40.0;

/// Build a provider exposing one simulated board speaking `frame`.
pub fn board(frame: &FrameFormat) -> SimPorts {
    let frame = frame.clone();
    let script = SimScript::generated(LINE_INTERVAL, move |n| line(&frame, n));
    SimPorts::builder().with_device(SIM_PORT, script).build()
}

fn line(frame: &FrameFormat, n: u64) -> String {
    let phase = n as f32 * SWEEP_STEP;
    match frame {
        FrameFormat::Named { keys } => {
            let target = (keys.len().saturating_sub(1)) as f32 * 0.5 * (1.0 + phase.sin());
            keys.iter()
                .enumerate()
                .map(|(i, key)| format!("{key}:{:.1}", distance(i, target)))
                .collect::<Vec<_>>()
                .join(",")
        }
        FrameFormat::Csv { fields } => {
            let mut values = vec![0.0f32; *fields];
            if let Some(acc_y) = values.first_mut() {
                *acc_y = phase.sin();
            }
            if let Some(acc_z) = values.get_mut(2) {
                *acc_z = 9.81;
            }
            values
                .iter()
                .map(|v| format!("{v:.3}"))
                .collect::<Vec<_>>()
                .join(",")
        }
    }
}

fn distance(sensor: usize, target: f32) -> f32 {
    let d = 6.0 + 10.0 * (sensor as f32 - target).abs();
    if d >= 30.0 { OUT_OF_RANGE } else { d }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinelink_link::FrameCodec;

    #[test]
    fn proximity_lines_decode_with_matching_codec() {
        let format = FrameFormat::proximity(5);
        let codec = FrameCodec::new(format.clone()).unwrap();
        for n in [1, 50, 200] {
            let values = codec.decode(&line(&format, n)).unwrap();
            assert_eq!(values.len(), 5);
            assert!(values.iter().any(|&d| d < 30.0));
        }
    }

    #[test]
    fn tilt_lines_decode_with_matching_codec() {
        let format = FrameFormat::tilt();
        let codec = FrameCodec::new(format.clone()).unwrap();
        let values = codec.decode(&line(&format, 10)).unwrap();
        assert!((values[2] - 9.81).abs() < 1e-3);
        assert!(values[0].abs() <= 1.0);
    }
}
