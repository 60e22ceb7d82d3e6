//! Background reader thread.
//!
//! The reader owns the Device Handle while streaming.  It checks its stop
//! flag after every bounded read, so a stop request is honoured within one
//! read timeout.  On an I/O failure it closes the handle *before* raising
//! the `lost` flag, which lets the link reconnect as soon as it observes the
//! flag without ever holding two handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use kinelink_hal::SerialDevice;
use kinelink_types::RawSample;
use tracing::{debug, trace, warn};

use crate::channel::SamplePublisher;
use crate::frame::FrameCodec;

/// Counters shared between the link and its readers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub link_losses: AtomicU64,
    pub connects: AtomicU64,
}

/// Everything a reader needs, moved into the thread.
pub(crate) struct ReaderContext {
    pub device: Box<dyn SerialDevice>,
    pub codec: FrameCodec,
    pub publisher: Arc<SamplePublisher>,
    pub sequence: Arc<AtomicU64>,
    pub counters: Arc<Counters>,
}

/// Link-side handle on a running reader.
pub(crate) struct ReaderHandle {
    thread: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
}

impl ReaderHandle {
    /// Spawn a named reader thread.  On failure the device is dropped with
    /// the unspawned closure.
    pub fn spawn(ctx: ReaderContext) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let lost = Arc::new(AtomicBool::new(false));
        let name = format!("kinelink-reader:{}", ctx.device.port_name());

        let thread = {
            let stop = Arc::clone(&stop);
            let lost = Arc::clone(&lost);
            thread::Builder::new()
                .name(name)
                .spawn(move || run(ctx, &stop, &lost))?
        };
        Ok(Self { thread, stop, lost })
    }

    /// `true` once the reader hit an I/O failure and released the device.
    pub fn link_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Raise the stop flag and wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` when the deadline passed; the thread is then detached
    /// and will exit after its current read.
    pub fn stop_within(self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.join();
        true
    }

    /// Join a thread that already finished.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("serial reader thread panicked");
        }
    }
}

fn run(ctx: ReaderContext, stop: &AtomicBool, lost: &AtomicBool) {
    let ReaderContext {
        mut device,
        codec,
        publisher,
        sequence,
        counters,
    } = ctx;
    let port = device.port_name().to_string();
    debug!(port = %port, "serial reader started");

    while !stop.load(Ordering::Acquire) {
        match device.read_line() {
            Ok(None) => {}
            Ok(Some(line)) => match codec.decode(&line) {
                Ok(channels) => {
                    let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                    publisher.publish(RawSample::new(seq, channels));
                    counters.frames_accepted.fetch_add(1, Ordering::Relaxed);
                    trace!(port = %port, sequence = seq, "frame published");
                }
                Err(e) => {
                    counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(port = %port, error = %e, line = %line, "discarding malformed frame");
                }
            },
            Err(e) => {
                warn!(port = %port, error = %e, "serial link lost");
                counters.link_losses.fetch_add(1, Ordering::Relaxed);
                drop(device);
                lost.store(true, Ordering::Release);
                return;
            }
        }
    }

    debug!(port = %port, "serial reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::sample_channel;
    use crate::frame::FrameFormat;
    use kinelink_hal::sim::{SimPorts, SimScript};
    use kinelink_hal::{PortProvider, PortSettings};

    fn open(ports: &SimPorts) -> Box<dyn SerialDevice> {
        let settings = PortSettings {
            read_timeout: Duration::from_millis(2),
            ..PortSettings::default()
        };
        ports.open("COM1", &settings).unwrap()
    }

    fn context(device: Box<dyn SerialDevice>) -> (ReaderContext, crate::SampleSubscriber, Arc<Counters>) {
        let (publisher, subscriber) = sample_channel();
        let counters = Arc::new(Counters::default());
        let ctx = ReaderContext {
            device,
            codec: FrameCodec::new(FrameFormat::tilt()).unwrap(),
            publisher: Arc::new(publisher),
            sequence: Arc::new(AtomicU64::new(0)),
            counters: Arc::clone(&counters),
        };
        (ctx, subscriber, counters)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn publishes_frames_and_skips_garbage() {
        let ports = SimPorts::builder()
            .with_device("COM1", SimScript::lines(["1,0,9.8", "x,y", "2,0,9.8"]))
            .build();
        let (ctx, subscriber, counters) = context(open(&ports));
        let reader = ReaderHandle::spawn(ctx).unwrap();

        wait_for(|| counters.frames_accepted.load(Ordering::Relaxed) == 2);
        let latest = subscriber.latest().unwrap();
        assert_eq!(latest.sequence(), 2);
        assert_eq!(latest.channels(), &[2.0, 0.0, 9.8]);
        assert_eq!(counters.frames_rejected.load(Ordering::Relaxed), 1);

        assert!(reader.stop_within(Duration::from_secs(1)));
        assert_eq!(ports.open_handles(), 0);
    }

    #[test]
    fn io_failure_releases_device_then_flags_loss() {
        let ports = SimPorts::builder()
            .with_device("COM1", SimScript::lines(["1,0,9.8"]).then_disconnect())
            .build();
        let (ctx, _subscriber, counters) = context(open(&ports));
        let reader = ReaderHandle::spawn(ctx).unwrap();

        wait_for(|| reader.link_lost());
        assert_eq!(ports.open_handles(), 0);
        assert_eq!(counters.link_losses.load(Ordering::Relaxed), 1);
        wait_for(|| reader.is_finished());
        reader.join();
    }

    #[test]
    fn stop_flag_ends_idle_reader() {
        let ports = SimPorts::builder()
            .with_device("COM1", SimScript::silent())
            .build();
        let (ctx, subscriber, _counters) = context(open(&ports));
        let reader = ReaderHandle::spawn(ctx).unwrap();

        assert!(reader.stop_within(Duration::from_secs(1)));
        assert!(subscriber.latest().is_none());
        assert_eq!(ports.open_handles(), 0);
    }
}
