//! Manually ticked timers.
//!
//! A [`PolledInterval`] never reads a clock. It compares its start time against
//! a [`TickSnapshot`], and the snapshot only moves when the scheduler calls
//! [`TickSnapshot::update`] at the top of a tick. Every decision within one
//! tick therefore sees the same "now", and tests can move time by hand without
//! sleeping.
//!
//! ## Lifecycle
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`PolledInterval::new`] | starts counting from the snapshot |
//! | [`PolledInterval::elapsed`] | `now - start >= interval` |
//! | [`PolledInterval::reset`] | restarts from the snapshot |
//! | drop | destroys the timer; owners hold `Option<PolledInterval>` |

use std::time::Duration;

use crate::clock::Clock;

/// The time observed by one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSnapshot {
    now: Duration,
}

impl TickSnapshot {
    /// Take an initial snapshot from `clock`.
    pub fn new(clock: &dyn Clock) -> Self {
        Self { now: clock.now() }
    }

    /// A snapshot fixed at `now`.
    pub fn at(now: Duration) -> Self {
        Self { now }
    }

    /// Refresh the snapshot from `clock`.
    ///
    /// This is the only way the observed time changes.
    pub fn update(&mut self, clock: &dyn Clock) {
        self.now = clock.now();
    }

    /// The snapshotted time.
    #[inline]
    pub fn now(&self) -> Duration {
        self.now
    }
}

/// A timer that elapses `interval` after creation or the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolledInterval {
    last_interval_start: Duration,
    interval: Duration,
}

impl PolledInterval {
    /// Start a new interval at the snapshot time.
    pub fn new(interval: Duration, snapshot: &TickSnapshot) -> Self {
        Self {
            last_interval_start: snapshot.now(),
            interval,
        }
    }

    /// Whether the interval has elapsed as of `snapshot`.
    pub fn elapsed(&self, snapshot: &TickSnapshot) -> bool {
        snapshot.now().saturating_sub(self.last_interval_start) >= self.interval
    }

    /// Restart the countdown from the snapshot time.
    pub fn reset(&mut self, snapshot: &TickSnapshot) {
        self.last_interval_start = snapshot.now();
    }

    /// Configured interval length.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the current countdown started.
    pub fn started_at(&self) -> Duration {
        self.last_interval_start
    }
}
