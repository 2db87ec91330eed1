//! Attaching, detaching and draining streams.

use std::time::Duration;

use cadence_core::{DeviceIdx, Direction, StreamId, frames_at_rate, frames_to_ms, frames_to_time};

use crate::open_dev::{AttachedStream, OpenDev};
use crate::scheduler::Scheduler;
use crate::stream::{BindTarget, ClientStream};
use crate::{Error, Result};

impl OpenDev {
    /// Bind `stream` to this device.
    fn attach(&mut self, stream: &dyn ClientStream, now: Duration) -> Result<()> {
        let idx = self.idx();
        let id = stream.id();
        let format = self.dev.format();

        if self.streams.is_empty() {
            self.last_wake = None;
            self.longest_wake = Duration::ZERO;
        }

        let init_cb_ts = match stream.direction() {
            Direction::Output => Some(self.initial_playback_cb_ts(stream, now)?),
            Direction::Input => {
                if self.streams.is_empty() {
                    let flushed = self.dev.flush_buffer().map_err(|e| Error::device(idx, e))?;
                    tracing::trace!(dev = %idx, flushed, "flushed input before first stream");
                }
                None
            }
        };

        let target = BindTarget {
            idx,
            format,
            init_cb_ts,
        };
        let binding = stream.bind(&target).map_err(|e| Error::stream(id, e))?;
        let mut attached = AttachedStream::new(binding);

        if stream.direction() == Direction::Input {
            attached.binding.start();
            if let Some(first) = self.streams.first() {
                attached.offset = first.offset.min(stream.cb_threshold());
            }
        }

        tracing::debug!(stream = %id, dev = %idx, ?init_cb_ts, "stream attached");
        self.streams.push(attached);
        Ok(())
    }

    /// First callback time of a new playback binding.
    ///
    /// Joins the schedule of streams already on the device; otherwise waits
    /// until the device has drained to one callback's worth of frames.
    fn initial_playback_cb_ts(&mut self, stream: &dyn ClientStream, now: Duration) -> Result<Duration> {
        if let Some(ts) = self
            .streams
            .iter()
            .filter_map(|s| s.binding.next_cb_ts())
            .min()
        {
            return Ok(ts);
        }

        let idx = self.idx();
        let level = self.dev.valid_frames().map_err(|e| Error::device(idx, e))?;
        let dev_rate = self.dev.format().frame_rate;
        let cb_frames = frames_at_rate(stream.frame_rate(), stream.cb_threshold(), dev_rate);
        Ok(now + frames_to_time(level.saturating_sub(cb_frames), dev_rate))
    }
}

impl Scheduler {
    /// Attach `stream` to each listed open device of its direction.
    ///
    /// Devices that are not open, or already carry the stream, are skipped.
    /// If any binding fails, the bindings created by this call are removed
    /// and the error is returned. First callback times are measured from the
    /// live clock, not the last tick.
    pub fn append_stream(&mut self, stream: &dyn ClientStream, devices: &[DeviceIdx]) -> Result<()> {
        let dir = stream.direction();
        let id = stream.id();
        let now = self.clock.now();
        let mut created = Vec::with_capacity(devices.len());

        for &idx in devices {
            let Some(adev) = self.find_mut(dir, idx) else {
                continue;
            };
            if adev.has_stream(id) {
                continue;
            }
            if let Err(e) = adev.attach(stream, now) {
                tracing::warn!(stream = %id, dev = %idx, error = %e, "attach failed, rolling back");
                for done in created {
                    if let Some(adev) = self.find_mut(dir, done) {
                        adev.detach(id);
                    }
                }
                return Err(e);
            }
            created.push(idx);
        }
        Ok(())
    }

    /// Detach stream `id` from `dev`, or from every open device when `dev`
    /// is `None`.
    ///
    /// Removing a stream that is not attached does nothing.
    pub fn remove_stream(&mut self, id: StreamId, dev: Option<DeviceIdx>) {
        if let Some(s) = self
            .devs
            .iter()
            .flatten()
            .find_map(|adev| adev.stream(id))
        {
            let longest = s.binding.longest_fetch_interval();
            let period = s.binding.sleep_interval();
            let delay_ms = longest.saturating_sub(period).as_millis() as u64;
            if delay_ms > 0 {
                self.metrics.longest_fetch_delay(delay_ms);
            }
        }

        for adev in self.devs.iter_mut().flatten() {
            if dev.is_some_and(|d| d != adev.idx()) {
                continue;
            }
            if adev.detach(id) {
                tracing::debug!(stream = %id, dev = %adev.idx(), "stream detached");
            }
        }
    }

    /// Start draining playback stream `id`.
    ///
    /// Returns the milliseconds the client should wait before asking again.
    /// Zero means the stream is gone: either nothing was left to play or it
    /// is not a playback stream.
    pub fn drain_stream(&mut self, id: StreamId) -> u64 {
        let queued = self.devs[Direction::Output.index()]
            .iter()
            .find_map(|adev| adev.stream(id))
            .map(|s| (s.binding.shm_frames(), s.binding.frame_rate()));

        match queued {
            Some((frames, rate)) if frames > 0 => {
                for adev in &mut self.devs[Direction::Output.index()] {
                    for s in adev.streams.iter_mut().filter(|s| s.id() == id) {
                        s.binding.set_draining(true);
                    }
                }
                let ms = 1 + frames_to_ms(frames as usize, rate);
                tracing::debug!(stream = %id, frames, ms, "stream draining");
                ms
            }
            _ => {
                self.remove_stream(id, None);
                0
            }
        }
    }

    /// Whether stream `id` is bound to device `idx`.
    pub fn is_stream_attached(&self, dir: Direction, idx: DeviceIdx, id: StreamId) -> bool {
        self.find(dir, idx).is_some_and(|adev| adev.has_stream(id))
    }
}
