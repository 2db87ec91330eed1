//! The audio thread's scheduling state and tick.
//!
//! [`Scheduler`] is single-threaded. It owns the open devices for both
//! directions, the tick snapshot and the monitoring state. The
//! [`AudioThread`](crate::AudioThread) driver owns one and calls
//! [`Scheduler::run`] and [`Scheduler::next_sleep`] in a loop; tests drive
//! it directly with a [`ManualClock`](cadence_core::ManualClock).
//!
//! Work is split by concern across modules, each adding an `impl Scheduler`
//! block:
//!
//! | Module | Operations |
//! |--------|------------|
//! | `open_dev` | add, remove and find open devices, device error handling |
//! | `attach` | attach, detach and drain streams |
//! | `playback` | fetch from clients, mix and write to hardware |
//! | `capture` | read hardware, post to clients, drop stale input |
//! | `monitor` | non-empty transitions, busy-loop detection |
//! | `dump` | diagnostic snapshot |

use std::sync::Arc;
use std::time::Duration;

use cadence_config::ThreadConfig;
use cadence_core::{Clock, DeviceIdx, Direction, TickSnapshot};

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::monitor::{BusyloopDetector, NonEmptyNotifier, ThreadCounters};
use crate::open_dev::OpenDev;

/// Scheduling engine of one audio thread.
pub struct Scheduler {
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) tick: TickSnapshot,
    pub(crate) config: ThreadConfig,
    /// Open devices, indexed by [`Direction::index`].
    pub(crate) devs: [Vec<OpenDev>; 2],
    pub(crate) metrics: Box<dyn MetricsSink>,
    pub(crate) notifier: Option<Box<dyn NonEmptyNotifier>>,
    pub(crate) non_empty_device_count: usize,
    pub(crate) busyloop: BusyloopDetector,
    pub(crate) counters: Arc<ThreadCounters>,
}

impl Scheduler {
    /// Create a scheduler with no open devices.
    pub fn new(config: ThreadConfig, clock: Box<dyn Clock>) -> Self {
        let tick = TickSnapshot::new(clock.as_ref());
        Self {
            clock,
            tick,
            config,
            devs: [Vec::new(), Vec::new()],
            metrics: Box::new(NoopMetrics),
            notifier: None,
            non_empty_device_count: 0,
            busyloop: BusyloopDetector::default(),
            counters: Arc::new(ThreadCounters::default()),
        }
    }

    /// Report metrics to `metrics` instead of discarding them.
    pub fn with_metrics(mut self, metrics: Box<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Send non-empty transitions to `notifier`.
    pub fn with_notifier(mut self, notifier: Box<dyn NonEmptyNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Thread tunables.
    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    /// Counters shared with the thread handle.
    pub fn counters(&self) -> Arc<ThreadCounters> {
        Arc::clone(&self.counters)
    }

    /// Time observed by the current tick.
    #[inline]
    pub fn now(&self) -> Duration {
        self.tick.now()
    }

    /// Output devices currently reported non-empty.
    pub fn non_empty_device_count(&self) -> usize {
        self.non_empty_device_count
    }

    /// Run one tick.
    pub fn run(&mut self) {
        self.tick.update(self.clock.as_ref());
        let now = self.now();

        self.update_longest_wake(Direction::Output, now);
        self.update_longest_wake(Direction::Input, now);

        self.playback_fetch();

        if let Err(e) = self.capture() {
            tracing::warn!(error = %e, "capture failed");
        }

        if let Err(e) = self.send_captured_samples() {
            tracing::warn!(error = %e, "failed to send captured samples");
        }

        if let Err(e) = self.playback_write() {
            tracing::warn!(error = %e, "playback write failed");
        }

        self.check_non_empty_state_transition();
        self.counters.record_tick();
    }

    /// How long the thread may sleep before the next tick.
    ///
    /// `None` means nothing needs a timed wake and the thread should wait
    /// for a command. The result never exceeds the configured sleep ceiling.
    pub fn next_sleep(&self) -> Option<Duration> {
        let now = self.clock.now();
        let mut min_ts = now + self.config.max_sleep();
        let mut wakers = 0;

        for adev in &self.devs[Direction::Output.index()] {
            for s in &adev.streams {
                let b = &s.binding;
                if b.is_draining() || !b.is_running() || b.is_pending_reply() {
                    continue;
                }
                if let Some(ts) = b.next_cb_ts() {
                    wakers += 1;
                    min_ts = min_ts.min(ts);
                }
            }
            if adev.dev.should_wake() {
                wakers += 1;
                min_ts = min_ts.min(adev.wake_ts);
            }
        }

        for adev in &self.devs[Direction::Input.index()] {
            if adev.ignores_wake() {
                continue;
            }
            wakers += 1;
            min_ts = min_ts.min(adev.wake_ts);
        }

        if wakers == 0 {
            return None;
        }
        Some(min_ts.saturating_sub(now))
    }

    fn update_longest_wake(&mut self, dir: Direction, now: Duration) {
        for adev in &mut self.devs[dir.index()] {
            if adev.streams.is_empty() {
                continue;
            }
            if let Some(last) = adev.last_wake {
                let gap = now.saturating_sub(last);
                if gap > adev.longest_wake {
                    adev.longest_wake = gap;
                }
            }
            adev.last_wake = Some(now);
        }
    }

    pub(crate) fn find(&self, dir: Direction, idx: DeviceIdx) -> Option<&OpenDev> {
        self.devs[dir.index()].iter().find(|adev| adev.idx() == idx)
    }

    pub(crate) fn find_mut(&mut self, dir: Direction, idx: DeviceIdx) -> Option<&mut OpenDev> {
        self.devs[dir.index()]
            .iter_mut()
            .find(|adev| adev.idx() == idx)
    }

    /// Indices of the open devices in `dir`, for loops that may remove entries.
    pub(crate) fn open_idxs(&self, dir: Direction) -> Vec<DeviceIdx> {
        self.devs[dir.index()].iter().map(OpenDev::idx).collect()
    }

    /// Rate ratio of the first open output device, the clock streams follow.
    pub(crate) fn master_rate_ratio(&self) -> f64 {
        self.devs[Direction::Output.index()]
            .first()
            .map_or(1.0, |adev| adev.dev.est_rate_ratio())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.tick.now())
            .field("outputs", &self.devs[Direction::Output.index()].len())
            .field("inputs", &self.devs[Direction::Input.index()].len())
            .field("non_empty_device_count", &self.non_empty_device_count)
            .finish_non_exhaustive()
    }
}
