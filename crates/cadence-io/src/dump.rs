//! Diagnostic snapshot of the thread's state.
//!
//! Produced on request between ticks and serializable, so a control client
//! can print it as JSON.

use serde::Serialize;
use std::time::Duration;

use cadence_core::Direction;

use crate::open_dev::{AttachedStream, OpenDev};
use crate::scheduler::Scheduler;

/// State of the whole thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSnapshot {
    /// Time of the last tick.
    pub tick: Duration,
    /// Ticks run so far.
    pub ticks: u64,
    /// Busy loops detected so far.
    pub busyloops: u64,
    /// Output devices currently counted non-empty.
    pub non_empty_device_count: usize,
    /// Open devices, outputs first.
    pub devices: Vec<DeviceSnapshot>,
}

/// State of one open device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// Device index.
    pub idx: u32,
    /// "output" or "input".
    pub direction: String,
    /// Backend name.
    pub name: String,
    /// Frames per second.
    pub frame_rate: u32,
    /// Channels per frame.
    pub num_channels: usize,
    /// Hardware buffer size in frames.
    pub buffer_size: usize,
    /// Smallest running callback threshold.
    pub min_cb_level: usize,
    /// Largest running callback threshold.
    pub max_cb_level: usize,
    /// Estimated rate ratio.
    pub est_rate_ratio: f64,
    /// Coarse rate nudge: -1, 0 or 1.
    pub coarse_rate_adjust: i32,
    /// Highest level seen.
    pub highest_hw_level: usize,
    /// Next scheduled wake.
    pub wake_ts: Duration,
    /// Longest gap between services.
    pub longest_wake: Duration,
    /// Underruns so far.
    pub num_underruns: u32,
    /// Whether the device currently counts as empty.
    pub is_empty: bool,
    /// Attached streams.
    pub streams: Vec<StreamSnapshot>,
}

/// State of one stream binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    /// Stream id.
    pub id: u32,
    /// Offset into the device region.
    pub offset: usize,
    /// Frames per callback.
    pub cb_threshold: usize,
    /// Client rate.
    pub frame_rate: u32,
    /// Running flag.
    pub running: bool,
    /// Draining flag.
    pub draining: bool,
    /// Waiting on a client reply.
    pub pending_reply: bool,
    /// Next callback time.
    pub next_cb_ts: Option<Duration>,
    /// Longest fetch reply time.
    pub longest_fetch_interval: Duration,
}

impl StreamSnapshot {
    fn of(s: &AttachedStream) -> Self {
        let b = &s.binding;
        Self {
            id: b.stream_id().0,
            offset: s.offset,
            cb_threshold: b.cb_threshold(),
            frame_rate: b.frame_rate(),
            running: b.is_running(),
            draining: b.is_draining(),
            pending_reply: b.is_pending_reply(),
            next_cb_ts: b.next_cb_ts(),
            longest_fetch_interval: b.longest_fetch_interval(),
        }
    }
}

impl DeviceSnapshot {
    fn of(adev: &OpenDev, scheduler: &Scheduler) -> Self {
        let dev = &adev.dev;
        let format = dev.format();
        Self {
            idx: adev.idx().0,
            direction: adev.direction().to_string(),
            name: dev.name().to_string(),
            frame_rate: format.frame_rate,
            num_channels: format.num_channels,
            buffer_size: dev.buffer_size(),
            min_cb_level: dev.min_cb_level(),
            max_cb_level: dev.max_cb_level(),
            est_rate_ratio: dev.est_rate_ratio(),
            coarse_rate_adjust: adev.coarse_rate_adjust,
            highest_hw_level: adev.highest_hw_level,
            wake_ts: adev.wake_ts,
            longest_wake: adev.longest_wake,
            num_underruns: dev.num_underruns(),
            is_empty: adev
                .empty_pi
                .is_some_and(|pi| pi.elapsed(&scheduler.tick)),
            streams: adev.streams.iter().map(StreamSnapshot::of).collect(),
        }
    }
}

impl Scheduler {
    /// Capture the thread's current state.
    pub fn dump(&self) -> ThreadSnapshot {
        let devices = Direction::ALL
            .iter()
            .flat_map(|dir| self.devs[dir.index()].iter())
            .map(|adev| DeviceSnapshot::of(adev, self))
            .collect();
        ThreadSnapshot {
            tick: self.tick.now(),
            ticks: self.counters.ticks(),
            busyloops: self.counters.busyloops(),
            non_empty_device_count: self.non_empty_device_count,
            devices,
        }
    }
}
