//! [`ControlLoop`] – fixed-cadence driver of the arbiter.
//!
//! Ticks are scheduled on absolute deadlines (`start + k · period`) so small
//! scheduling delays do not accumulate.  When a tick overruns its slot the
//! schedule is re-anchored at the current instant instead of bursting to
//! catch up.  The loop stops at the next tick boundary after the shutdown
//! flag is raised.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::arbiter::{ControlledObject, InputArbiter, Selection};
use crate::error::RuntimeError;

/// Highest accepted tick rate.
pub const MAX_TICK_HZ: u32 = 1000;

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub ticks: u64,
    /// Ticks that took longer than one period.
    pub overruns: u64,
    /// Ticks driven by the pointer fallback.
    pub fallback_ticks: u64,
}

pub struct ControlLoop {
    period: Duration,
    max_ticks: Option<u64>,
    shutdown: Arc<AtomicBool>,
}

impl ControlLoop {
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidTickRate`] outside `1..=MAX_TICK_HZ`.
    pub fn new(tick_hz: u32) -> Result<Self, RuntimeError> {
        if tick_hz == 0 || tick_hz > MAX_TICK_HZ {
            return Err(RuntimeError::InvalidTickRate {
                got: tick_hz,
                max: MAX_TICK_HZ,
            });
        }
        Ok(Self {
            period: Duration::from_secs(1) / tick_hz,
            max_ticks: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop on its own after `ticks` ticks.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Share an externally owned shutdown flag (e.g. one set by Ctrl-C).
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Flag that stops [`run`](Self::run) when set to `true`.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Drive `arbiter` into `target` until shutdown.
    ///
    /// `observe` sees every selection after it has been applied.
    pub fn run<F>(
        &self,
        arbiter: &mut InputArbiter,
        target: &mut dyn ControlledObject,
        mut observe: F,
    ) -> LoopReport
    where
        F: FnMut(u64, &Selection<'_>),
    {
        let mut report = LoopReport::default();
        let mut next = Instant::now();
        info!(period = ?self.period, "control loop started");

        while !self.shutdown.load(Ordering::Relaxed)
            && self.max_ticks.is_none_or(|max| report.ticks < max)
        {
            let started = Instant::now();
            let selection = arbiter.tick(target);
            report.ticks += 1;
            if selection.fallback {
                report.fallback_ticks += 1;
            }
            observe(report.ticks, &selection);

            let elapsed = started.elapsed();
            next += self.period;
            let now = Instant::now();
            if now >= next {
                if elapsed > self.period {
                    report.overruns += 1;
                    warn!(tick = report.ticks, elapsed = ?elapsed, "control tick overran its period");
                }
                next = now;
            } else {
                thread::sleep(next - now);
            }
        }

        info!(
            ticks = report.ticks,
            overruns = report.overruns,
            "control loop stopped"
        );
        report
    }
}
