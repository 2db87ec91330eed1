//! Metric and event reporting from the audio thread.
//!
//! The thread never blocks on reporting. A [`MetricsSink`] receives plain
//! values; what it does with them (forward to a collector, log, drop) is up
//! to the implementation. Every method defaults to a no-op.

use std::time::Duration;

use cadence_core::{DeviceIdx, Direction};

/// Notable thread events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEvent {
    /// A device reported a severe underrun and was reset.
    SevereUnderrun,
    /// Captured frames were dropped to bound input latency.
    DropSamples,
    /// The thread slept for zero time too many ticks in a row.
    Busyloop,
}

/// One reported metric, as captured by recording sinks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricRecord {
    /// Time a device stayed open.
    DeviceRuntime {
        /// Device.
        idx: DeviceIdx,
        /// Device direction.
        direction: Direction,
        /// Open duration.
        runtime: Duration,
    },
    /// Highest hardware level against the largest callback level.
    HighestDeviceDelay {
        /// Highest hardware level seen.
        hw_level: usize,
        /// Largest callback threshold.
        largest_cb_level: usize,
        /// Device direction.
        direction: Direction,
    },
    /// Highest hardware level seen while open.
    HighestHwLevel {
        /// Level in frames.
        hw_level: usize,
        /// Device direction.
        direction: Direction,
    },
    /// A client answered fetches slower than its callback period.
    LongestFetchDelay(u64),
    /// Underruns at device close.
    NumUnderruns(u32),
    /// A busy loop ended.
    Busyloop {
        /// How long it lasted.
        duration: Duration,
        /// Consecutive zero sleeps.
        count: u32,
    },
    /// A thread event.
    Event(ThreadEvent),
}

/// Receiver of thread metrics.
pub trait MetricsSink: Send {
    /// A device closed after `runtime`.
    fn device_runtime(&self, _idx: DeviceIdx, _direction: Direction, _runtime: Duration) {}

    /// Highest device delay at close.
    fn highest_device_delay(
        &self,
        _hw_level: usize,
        _largest_cb_level: usize,
        _direction: Direction,
    ) {
    }

    /// Highest hardware level at close.
    fn highest_hw_level(&self, _hw_level: usize, _direction: Direction) {}

    /// Slowest client fetch beyond its callback period, in milliseconds.
    fn longest_fetch_delay(&self, _delay_ms: u64) {}

    /// Underrun count at close.
    fn num_underruns(&self, _count: u32) {}

    /// A busy loop of `count` zero sleeps ended after `duration`.
    fn busyloop(&self, _duration: Duration, _count: u32) {}

    /// A thread event occurred.
    fn thread_event(&self, _event: ThreadEvent) {}

    /// Forward a recorded metric to the matching method.
    fn record(&self, record: MetricRecord) {
        match record {
            MetricRecord::DeviceRuntime {
                idx,
                direction,
                runtime,
            } => self.device_runtime(idx, direction, runtime),
            MetricRecord::HighestDeviceDelay {
                hw_level,
                largest_cb_level,
                direction,
            } => self.highest_device_delay(hw_level, largest_cb_level, direction),
            MetricRecord::HighestHwLevel {
                hw_level,
                direction,
            } => self.highest_hw_level(hw_level, direction),
            MetricRecord::LongestFetchDelay(ms) => self.longest_fetch_delay(ms),
            MetricRecord::NumUnderruns(count) => self.num_underruns(count),
            MetricRecord::Busyloop { duration, count } => self.busyloop(duration, count),
            MetricRecord::Event(event) => self.thread_event(event),
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Sink that emits each metric as a `tracing` event on the `cadence::metrics`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn device_runtime(&self, idx: DeviceIdx, direction: Direction, runtime: Duration) {
        tracing::info!(target: "cadence::metrics", dev = %idx, %direction, ?runtime, "device runtime");
    }

    fn highest_device_delay(&self, hw_level: usize, largest_cb_level: usize, direction: Direction) {
        tracing::info!(
            target: "cadence::metrics",
            hw_level,
            largest_cb_level,
            %direction,
            "highest device delay"
        );
    }

    fn highest_hw_level(&self, hw_level: usize, direction: Direction) {
        tracing::info!(target: "cadence::metrics", hw_level, %direction, "highest hw level");
    }

    fn longest_fetch_delay(&self, delay_ms: u64) {
        tracing::info!(target: "cadence::metrics", delay_ms, "longest fetch delay");
    }

    fn num_underruns(&self, count: u32) {
        tracing::info!(target: "cadence::metrics", count, "underruns");
    }

    fn busyloop(&self, duration: Duration, count: u32) {
        tracing::warn!(target: "cadence::metrics", ?duration, count, "busyloop ended");
    }

    fn thread_event(&self, event: ThreadEvent) {
        tracing::info!(target: "cadence::metrics", ?event, "thread event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counting(Mutex<Vec<&'static str>>);

    impl MetricsSink for Counting {
        fn busyloop(&self, _duration: Duration, _count: u32) {
            self.0.lock().push("busyloop");
        }

        fn thread_event(&self, _event: ThreadEvent) {
            self.0.lock().push("event");
        }
    }

    #[test]
    fn record_dispatches_to_method() {
        let sink = Counting::default();
        sink.record(MetricRecord::Busyloop {
            duration: Duration::from_millis(3),
            count: 4,
        });
        sink.record(MetricRecord::Event(ThreadEvent::DropSamples));
        sink.record(MetricRecord::NumUnderruns(2));
        assert_eq!(*sink.0.lock(), vec!["busyloop", "event"]);
    }

    #[test]
    fn noop_and_tracing_accept_everything() {
        for sink in [&NoopMetrics as &dyn MetricsSink, &TracingMetrics] {
            sink.longest_fetch_delay(12);
            sink.thread_event(ThreadEvent::SevereUnderrun);
        }
    }
}
