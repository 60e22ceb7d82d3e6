//! `kinelink-runtime` – per-tick input selection for the game side.
//!
//! # Modules
//!
//! - [`arbiter`] – [`InputArbiter`][arbiter::InputArbiter]: asks every
//!   [`InputSource`][arbiter::InputSource] in fixed priority order for a
//!   fresh coordinate and forwards the first one to the
//!   [`ControlledObject`][arbiter::ControlledObject].  A pointer fallback
//!   guarantees a selection on every tick.
//! - [`sources`] – the concrete sources: the vision tracker feed, the serial
//!   telemetry link paired with a sample mapper, and the pointer.
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: fixed
//!   cadence driver with a cooperative shutdown flag.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod arbiter;
pub mod control_loop;
pub mod error;
pub mod sources;
pub mod telemetry;

pub use arbiter::{ControlledObject, InputArbiter, InputSource, Selection};
pub use control_loop::{ControlLoop, LoopReport};
pub use error::RuntimeError;
pub use sources::{
    PointerFeed, PointerSource, SampleMapper, TelemetrySource, VisionFeed, VisionSource,
    VisionToggle, pointer_channel, vision_channel,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
