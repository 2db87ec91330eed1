//! Thread health monitoring.
//!
//! Two things are watched between ticks:
//!
//! - **Non-empty outputs**: an output device counts as non-empty unless it
//!   has played only silence for the configured empty period. The
//!   [`NonEmptyNotifier`] hears about 0 ↔ non-zero transitions of that count
//!   so the server can, for example, suspend idle outputs.
//! - **Busy loops**: consecutive zero-length sleeps. Crossing the configured
//!   threshold emits a [`ThreadEvent::Busyloop`]; the loop's length and
//!   duration are reported when it ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cadence_core::Direction;
use crossbeam_channel::Sender;

use crate::metrics::ThreadEvent;
use crate::scheduler::Scheduler;

/// Receiver of non-empty transitions.
pub trait NonEmptyNotifier: Send {
    /// `true` when the first output became non-empty, `false` when the last
    /// one went empty.
    fn notify(&self, non_empty: bool);
}

impl NonEmptyNotifier for Sender<bool> {
    fn notify(&self, non_empty: bool) {
        if self.try_send(non_empty).is_err() {
            tracing::debug!(non_empty, "non-empty notification dropped");
        }
    }
}

/// Counters the thread publishes for readers on other threads.
#[derive(Debug, Default)]
pub struct ThreadCounters {
    ticks: AtomicU64,
    busyloops: AtomicU64,
    severe_underruns: AtomicU64,
    drops: AtomicU64,
}

impl ThreadCounters {
    /// Ticks run.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Busy loops detected.
    pub fn busyloops(&self) -> u64 {
        self.busyloops.load(Ordering::Relaxed)
    }

    /// Severe underruns handled.
    pub fn severe_underruns(&self) -> u64 {
        self.severe_underruns.load(Ordering::Relaxed)
    }

    /// Times stale input was dropped.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_busyloop(&self) {
        self.busyloops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_severe_underrun(&self) {
        self.severe_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

/// What a sleep decision did to the busy-loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BusyloopTransition {
    /// Nothing to report.
    None,
    /// The zero-sleep run just reached the threshold.
    Entered,
    /// A run that had reached the threshold ended.
    Exited {
        duration: Duration,
        count: u32,
    },
}

/// Counts consecutive zero-length sleeps.
#[derive(Debug, Default)]
pub(crate) struct BusyloopDetector {
    continuous_zero_sleep_count: u32,
    started_at: Duration,
}

impl BusyloopDetector {
    pub(crate) fn observe(
        &mut self,
        sleep: Option<Duration>,
        now: Duration,
        threshold: u32,
    ) -> BusyloopTransition {
        if sleep == Some(Duration::ZERO) {
            if self.continuous_zero_sleep_count == 0 {
                self.started_at = now;
            }
            self.continuous_zero_sleep_count += 1;
            if self.continuous_zero_sleep_count == threshold {
                return BusyloopTransition::Entered;
            }
            return BusyloopTransition::None;
        }

        let count = std::mem::take(&mut self.continuous_zero_sleep_count);
        if count >= threshold {
            return BusyloopTransition::Exited {
                duration: now.saturating_sub(self.started_at),
                count,
            };
        }
        BusyloopTransition::None
    }

    pub(crate) fn count(&self) -> u32 {
        self.continuous_zero_sleep_count
    }
}

impl Scheduler {
    /// Recount non-empty output devices and notify on 0 ↔ non-zero edges.
    pub fn check_non_empty_state_transition(&mut self) {
        let tick = self.tick;
        let count = self.devs[Direction::Output.index()]
            .iter()
            .filter(|adev| adev.empty_pi.is_none_or(|pi| !pi.elapsed(&tick)))
            .count();
        self.update_non_empty_state(count);
    }

    fn update_non_empty_state(&mut self, count: usize) {
        let was_empty = self.non_empty_device_count == 0;
        if count == 0 && !was_empty {
            tracing::debug!("all outputs empty");
            self.notify_non_empty(false);
        } else if count > 0 && was_empty {
            tracing::debug!(count, "outputs non-empty");
            self.notify_non_empty(true);
        }
        self.non_empty_device_count = count;
    }

    fn notify_non_empty(&self, non_empty: bool) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(non_empty);
        }
    }

    /// Feed the sleep chosen for this iteration to the busy-loop detector.
    pub fn check_busyloop(&mut self, sleep: Option<Duration>) {
        let now = self.clock.now();
        let threshold = self.config.max_continuous_zero_sleep;
        match self.busyloop.observe(sleep, now, threshold) {
            BusyloopTransition::None => {}
            BusyloopTransition::Entered => {
                tracing::warn!(count = threshold, "audio thread busy looping");
                self.metrics.thread_event(ThreadEvent::Busyloop);
                self.counters.record_busyloop();
            }
            BusyloopTransition::Exited { duration, count } => {
                tracing::debug!(?duration, count, "busy loop ended");
                self.metrics.busyloop(duration, count);
            }
        }
    }

    /// Consecutive zero-length sleeps so far.
    pub fn continuous_zero_sleep_count(&self) -> u32 {
        self.busyloop.count()
    }
}
