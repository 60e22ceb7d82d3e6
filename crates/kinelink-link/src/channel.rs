//! Latest-sample hand-off between the reader thread and its consumers.
//!
//! Uses a [`tokio::sync::watch`] channel holding an `Arc<RawSample>`.  The
//! reader publishes by replacing the whole `Arc`; a consumer clones the `Arc`
//! out, so it observes either the previous frame or the new one and never a
//! mix of both.  Neither side needs an async runtime: `send_replace` and
//! `borrow` are plain synchronous calls and the lock they take is held only
//! for the pointer swap.

use std::sync::Arc;

use kinelink_types::RawSample;
use tokio::sync::watch;

/// Create a connected publisher / subscriber pair with no sample yet.
pub fn sample_channel() -> (SamplePublisher, SampleSubscriber) {
    let (tx, rx) = watch::channel(None);
    (SamplePublisher { tx }, SampleSubscriber { rx })
}

/// Single writer side.  Only the telemetry link and its reader hold one.
#[derive(Debug)]
pub struct SamplePublisher {
    tx: watch::Sender<Option<Arc<RawSample>>>,
}

impl SamplePublisher {
    /// Replace the current sample.  Succeeds even when nobody is subscribed.
    pub fn publish(&self, sample: RawSample) -> Arc<RawSample> {
        let sample = Arc::new(sample);
        self.tx.send_replace(Some(sample.clone()));
        sample
    }

    /// Attach another read-only observer (diagnostics, recorders, …).
    pub fn subscribe(&self) -> SampleSubscriber {
        SampleSubscriber {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only observer of the latest sample.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct SampleSubscriber {
    rx: watch::Receiver<Option<Arc<RawSample>>>,
}

impl SampleSubscriber {
    /// Most recent sample, `None` until the first frame.  Never blocks on
    /// the reader.
    pub fn latest(&self) -> Option<Arc<RawSample>> {
        self.rx.borrow().clone()
    }

    /// Return the latest sample only if it was published after the previous
    /// call to this method on this subscriber.
    pub fn take_unseen(&mut self) -> Option<Arc<RawSample>> {
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn empty_until_first_publish() {
        let (publisher, subscriber) = sample_channel();
        assert!(subscriber.latest().is_none());

        publisher.publish(RawSample::new(1, vec![1.0, 2.0]));
        let sample = subscriber.latest().unwrap();
        assert_eq!(sample.sequence(), 1);
        assert_eq!(sample.channels(), &[1.0, 2.0]);
    }

    #[test]
    fn publish_replaces_whole_sample() {
        let (publisher, subscriber) = sample_channel();
        publisher.publish(RawSample::new(1, vec![1.0, 1.0, 1.0]));
        let held = subscriber.latest().unwrap();
        publisher.publish(RawSample::new(2, vec![2.0, 2.0, 2.0]));

        // The earlier Arc is untouched by the replacement.
        assert_eq!(held.channels(), &[1.0, 1.0, 1.0]);
        assert_eq!(subscriber.latest().unwrap().sequence(), 2);
    }

    #[test]
    fn take_unseen_reports_each_sample_once() {
        let (publisher, mut subscriber) = sample_channel();
        assert!(subscriber.take_unseen().is_none());

        publisher.publish(RawSample::new(1, vec![0.0]));
        assert_eq!(subscriber.take_unseen().unwrap().sequence(), 1);
        assert!(subscriber.take_unseen().is_none());
        // `latest` still returns it.
        assert!(subscriber.latest().is_some());
    }

    #[test]
    fn late_subscriber_sees_current_sample() {
        let (publisher, _first) = sample_channel();
        publisher.publish(RawSample::new(9, vec![4.0]));
        assert_eq!(publisher.subscribe().latest().unwrap().sequence(), 9);
    }

    #[test]
    fn concurrent_reader_never_sees_mixed_frames() {
        let (publisher, subscriber) = sample_channel();
        let writer = thread::spawn(move || {
            for n in 1..=2_000u64 {
                let v = n as f32;
                publisher.publish(RawSample::new(n, vec![v; 5]));
            }
        });

        for _ in 0..2_000 {
            if let Some(sample) = subscriber.latest() {
                let first = sample.channels()[0];
                assert!(sample.channels().iter().all(|&c| c == first));
                assert_eq!(first, sample.sequence() as f32);
            }
        }
        writer.join().unwrap();
    }
}
