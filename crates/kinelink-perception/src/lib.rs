//! `kinelink-perception` – turns raw sensor frames into control coordinates.
//!
//! # Modules
//!
//! - [`fusion`] – [`SensorFusionMapper`][fusion::SensorFusionMapper]: fuses a
//!   row of N proximity sensors into one continuous position using
//!   inverse-distance weighting, range normalization and spacing jitter.
//! - [`tilt`] – [`TiltMapper`][tilt::TiltMapper]: maps one accelerometer
//!   axis of an IMU frame onto an output range.

pub mod fusion;
pub mod tilt;

pub use fusion::{SensorFusionMapper, weighted_index};
pub use tilt::TiltMapper;
