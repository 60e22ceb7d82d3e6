//! `kinelink-link` – the serial telemetry link.
//!
//! Owns the physical connection to one sensor board, streams its frames on a
//! dedicated reader thread and publishes the latest decoded
//! [`RawSample`][kinelink_types::RawSample] for consumers running at their
//! own cadence.
//!
//! # Modules
//!
//! - [`frame`] – [`FrameCodec`][frame::FrameCodec]: decodes one text line
//!   (comma-separated values or named fields) into channel values and
//!   validates probe answers.
//! - [`probe`] – [`probe_candidates`][probe::probe_candidates]: deterministic
//!   port ordering and bounded probing of each candidate, independent of OS
//!   enumeration.
//! - [`channel`] – [`SamplePublisher`][channel::SamplePublisher] /
//!   [`SampleSubscriber`][channel::SampleSubscriber]: publish-by-replacement
//!   of immutable samples, single writer and many readers.
//! - [`link`] – [`SerialTelemetryLink`][link::SerialTelemetryLink]: connect,
//!   background reading, tick-driven reconnect and bounded shutdown.

pub mod channel;
pub mod frame;
pub mod link;
pub mod probe;
mod reader;

pub use channel::{SamplePublisher, SampleSubscriber, sample_channel};
pub use frame::{FrameCodec, FrameFormat};
pub use link::{LinkConfig, LinkStats, SerialTelemetryLink};
pub use probe::{ProbeOutcome, ProbeSettings, order_candidates, probe_candidates};
