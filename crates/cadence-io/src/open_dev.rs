//! The open-device registry.
//!
//! Each open device is an [`OpenDev`] entry in the scheduler's list for its
//! direction. The entry owns the device, the stream bindings attached to it
//! and the per-device scheduling state (wake time, silence timers, rate
//! adjustment). Dropping the entry releases all of them.

use std::time::Duration;

use cadence_core::{DeviceIdx, Direction, PolledInterval, StreamId};

use crate::device::{DeviceError, IoDevice, NodeType};
use crate::metrics::ThreadEvent;
use crate::scheduler::Scheduler;
use crate::stream::DevStream;
use crate::{Error, Result};

/// A stream binding and how far it has progressed in the device buffer.
pub(crate) struct AttachedStream {
    pub(crate) binding: Box<dyn DevStream>,
    /// Frames this binding has mixed into (or read from) the current device
    /// region beyond the last committed point.
    pub(crate) offset: usize,
}

impl AttachedStream {
    pub(crate) fn new(binding: Box<dyn DevStream>) -> Self {
        Self { binding, offset: 0 }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.binding.stream_id()
    }
}

/// One open device and its scheduling state.
pub(crate) struct OpenDev {
    pub(crate) dev: Box<dyn IoDevice>,
    pub(crate) streams: Vec<AttachedStream>,
    /// When the device next needs service.
    pub(crate) wake_ts: Duration,
    /// Tick time this device was last serviced with streams attached.
    pub(crate) last_wake: Option<Duration>,
    pub(crate) longest_wake: Duration,
    /// Running while the device plays silence; `None` while it plays audio.
    pub(crate) empty_pi: Option<PolledInterval>,
    /// Spaces out silence scans while the device is non-empty.
    pub(crate) non_empty_check_pi: Option<PolledInterval>,
    pub(crate) coarse_rate_adjust: i32,
    pub(crate) highest_hw_level: usize,
    /// Set once an input device has delivered timestamped frames. A hotword
    /// device stays silent until its DSP triggers.
    pub(crate) input_streaming: bool,
    pub(crate) opened_at: Duration,
}

impl OpenDev {
    pub(crate) fn new(dev: Box<dyn IoDevice>, now: Duration) -> Self {
        Self {
            dev,
            streams: Vec::new(),
            wake_ts: Duration::ZERO,
            last_wake: None,
            longest_wake: Duration::ZERO,
            empty_pi: None,
            non_empty_check_pi: None,
            coarse_rate_adjust: 0,
            highest_hw_level: 0,
            input_streaming: false,
            opened_at: now,
        }
    }

    pub(crate) fn idx(&self) -> DeviceIdx {
        self.dev.idx()
    }

    pub(crate) fn direction(&self) -> Direction {
        self.dev.direction()
    }

    pub(crate) fn has_stream(&self, id: StreamId) -> bool {
        self.streams.iter().any(|s| s.id() == id)
    }

    pub(crate) fn stream(&self, id: StreamId) -> Option<&AttachedStream> {
        self.streams.iter().find(|s| s.id() == id)
    }

    /// Drop the binding of stream `id`. Returns whether one was attached.
    pub(crate) fn detach(&mut self, id: StreamId) -> bool {
        let before = self.streams.len();
        self.streams.retain(|s| s.id() != id);
        self.streams.len() != before
    }

    /// Release `frames` committed frames from every running binding's offset.
    pub(crate) fn commit(&mut self, frames: usize) {
        for s in self.streams.iter_mut().filter(|s| s.binding.is_running()) {
            s.offset = s.offset.saturating_sub(frames);
        }
    }

    pub(crate) fn update_highest_hw_level(&mut self, hw_level: usize) {
        if hw_level > self.highest_hw_level {
            self.highest_hw_level = hw_level;
        }
    }

    /// Nudge the rate up when the level is far below the smallest callback,
    /// down when far above the largest.
    fn update_coarse_rate_adjust(&mut self, level: usize) {
        self.coarse_rate_adjust = if level < self.dev.min_cb_level() / 2 {
            1
        } else if level > self.dev.max_cb_level().saturating_mul(2) {
            -1
        } else {
            0
        };
    }

    /// Feed a level sample to the device's rate estimator and pass a changed
    /// estimate on to every binding.
    pub(crate) fn update_estimated_rate(
        &mut self,
        level: usize,
        timestamp: Duration,
        master_rate_ratio: f64,
    ) {
        self.update_coarse_rate_adjust(level);
        if !self.dev.update_rate(level, timestamp) {
            return;
        }
        let rate = self.dev.format().frame_rate;
        let ratio = self.dev.est_rate_ratio();
        let coarse = self.coarse_rate_adjust;
        for s in &mut self.streams {
            s.binding.set_dev_rate(rate, ratio, master_rate_ratio, coarse);
        }
        tracing::trace!(dev = %self.idx(), ratio, coarse, "rate estimate updated");
    }

    /// Nominal rate scaled by the estimated ratio.
    pub(crate) fn est_rate(&self) -> f64 {
        self.dev.format().frame_rate as f64 * self.dev.est_rate_ratio()
    }

    /// Write `frames` frames of silence.
    pub(crate) fn fill_zeros(&mut self, frames: usize) -> std::result::Result<usize, DeviceError> {
        let stride = self.dev.format().stride();
        let mut remaining = frames;
        while remaining > 0 {
            let buf = self.dev.get_output_buffer(remaining)?;
            let got = (buf.len() / stride).min(remaining);
            if got == 0 {
                break;
            }
            buf[..got * stride].fill(0.0);
            self.dev.put_output_buffer(got, None)?;
            remaining -= got;
        }
        Ok(frames - remaining)
    }

    /// Whether stale input may be dropped from this device.
    pub(crate) fn can_drop_samples(&self) -> bool {
        self.dev.is_open()
            && !self.streams.is_empty()
            && matches!(self.dev.active_node(), Some(node) if node != NodeType::Hotword)
    }

    /// Whether an input device is left out of sleep aggregation.
    pub(crate) fn ignores_wake(&self) -> bool {
        if !self.dev.is_open() {
            return true;
        }
        match self.dev.active_node() {
            None => true,
            Some(NodeType::Hotword) => !self.input_streaming,
            Some(_) => false,
        }
    }
}

// Device and stream commands arrive between ticks, when the tick snapshot
// may be a full sleep old. They read the live clock so that open times and
// first callback times are measured from when the command ran.

impl Scheduler {
    /// Register an open device with the thread.
    ///
    /// Output devices are primed with their minimum buffer level of silence.
    /// The open time is taken from the live clock.
    pub fn add_open_dev(&mut self, dev: Box<dyn IoDevice>) -> Result<()> {
        let dir = dev.direction();
        let idx = dev.idx();
        if self.find(dir, idx).is_some() {
            return Err(Error::DeviceAlreadyOpen(idx));
        }

        let mut adev = OpenDev::new(dev, self.clock.now());
        if dir == Direction::Output {
            let prefill = adev.dev.min_buffer_level();
            if let Err(e) = adev.fill_zeros(prefill) {
                tracing::warn!(dev = %idx, error = %e, "failed to prefill output buffer");
            }
        }

        tracing::debug!(dev = %idx, %dir, name = adev.dev.name(), "open device added");
        self.devs[dir.index()].push(adev);
        Ok(())
    }

    /// Remove an open device, reporting its close metrics.
    ///
    /// The reported runtime runs up to the live clock. Removing a device
    /// that is not open does nothing.
    pub fn rm_open_dev(&mut self, dir: Direction, idx: DeviceIdx) {
        let list = &mut self.devs[dir.index()];
        let Some(pos) = list.iter().position(|adev| adev.idx() == idx) else {
            return;
        };
        let adev = list.remove(pos);

        let runtime = self.clock.now().saturating_sub(adev.opened_at);
        self.metrics.num_underruns(adev.dev.num_underruns());
        self.metrics
            .highest_device_delay(adev.highest_hw_level, adev.dev.largest_cb_level(), dir);
        self.metrics.highest_hw_level(adev.highest_hw_level, dir);
        self.metrics.device_runtime(idx, dir, runtime);

        tracing::debug!(
            dev = %idx,
            %dir,
            streams = adev.streams.len(),
            ?runtime,
            "open device removed"
        );
        drop(adev);

        if dir == Direction::Output {
            self.check_non_empty_state_transition();
        }
    }

    /// Whether device `idx` is open in `dir`.
    pub fn is_dev_open(&self, dir: Direction, idx: DeviceIdx) -> bool {
        self.find(dir, idx).is_some()
    }

    /// Number of open devices in `dir`.
    pub fn open_dev_count(&self, dir: Direction) -> usize {
        self.devs[dir.index()].len()
    }

    /// React to a device error: a severe underrun resets the device first;
    /// either way the device leaves the open list.
    pub(crate) fn handle_dev_err(&mut self, dir: Direction, idx: DeviceIdx, err: DeviceError) {
        if err == DeviceError::SevereUnderrun {
            tracing::warn!(dev = %idx, %dir, "severe underrun, resetting device");
            if let Some(adev) = self.find_mut(dir, idx) {
                adev.dev.reset_on_error();
            }
            self.metrics.thread_event(ThreadEvent::SevereUnderrun);
            self.counters.record_severe_underrun();
        } else {
            tracing::error!(dev = %idx, %dir, error = %err, "device error, closing");
        }
        self.rm_open_dev(dir, idx);
    }
}
