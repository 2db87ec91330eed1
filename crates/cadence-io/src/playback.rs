//! Playback: fetching from clients and writing to output hardware.
//!
//! A playback tick has two halves. [`Scheduler::playback_fetch`] runs first
//! and asks clients whose callback time has come for more samples.
//! [`Scheduler::playback_write`] runs last; it mixes whatever the clients
//! have supplied into each output device and schedules the device's next
//! wake.
//!
//! Streams progress through a device buffer independently. Each binding
//! keeps an offset of frames mixed past the last commit; the device only
//! commits the frames every running binding has written.

use std::time::Duration;

use cadence_core::{
    DeviceIdx, Direction, PolledInterval, StreamId, TickSnapshot, frames_to_time_precise,
};

use crate::device::{AudioFormat, DeviceError, DeviceState};
use crate::open_dev::{AttachedStream, OpenDev};
use crate::scheduler::Scheduler;
use crate::stream::DevStream;
use crate::Result;

/// Frames of output space left, keeping `min_buffer_level` in reserve.
pub(crate) fn buffer_avail(buffer_size: usize, hw_level: usize, min_buffer_level: usize) -> usize {
    buffer_size
        .saturating_sub(hw_level)
        .saturating_sub(min_buffer_level)
}

/// Frames the device can play before it needs service.
///
/// With streams attached the whole level is played. Without streams the
/// device is woken one minimum callback early so it can top up silence.
pub(crate) fn frames_to_play_in_sleep(hw_level: usize, has_streams: bool, min_cb_level: usize) -> usize {
    if has_streams {
        hw_level
    } else {
        hw_level.saturating_sub(min_cb_level)
    }
}

fn is_time_to_fetch(binding: &dyn DevStream, now: Duration, fuzz: Duration) -> bool {
    binding.next_cb_ts().is_some_and(|ts| now + fuzz >= ts)
}

/// Per-tick timing inputs of a device write.
#[derive(Clone, Copy)]
struct WriteContext {
    tick: TickSnapshot,
    master_rate_ratio: f64,
    scan_interval: Duration,
    empty_period: Duration,
}

/// Mix every running stream into `dst` and return the frames all of them
/// have written.
///
/// Streams that fail, or finish draining, are appended to `doomed` and left
/// out of the mix and the returned count.
fn write_streams(
    streams: &mut [AttachedStream],
    format: &AudioFormat,
    dst: &mut [f32],
    max_frames: usize,
    doomed: &mut Vec<StreamId>,
) -> usize {
    let stride = format.stride();
    let live = |s: &AttachedStream, doomed: &[StreamId]| {
        s.binding.is_running() && !doomed.contains(&s.id())
    };

    let max_offset = streams
        .iter()
        .filter(|s| live(s, doomed))
        .map(|s| s.offset)
        .max()
        .unwrap_or(0);

    let mut num_playing = 0;
    let mut write_limit = max_frames;
    let mut drain_limit = max_frames;

    for s in streams.iter_mut() {
        if !live(s, doomed) {
            continue;
        }
        let id = s.id();
        if s.binding.attached_device_count() == 1 {
            s.binding.update_frames();
        }
        let frames = match s.binding.playback_frames() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(stream = %id, error = %e, "bad playback frame count, removing");
                doomed.push(id);
                continue;
            }
        };
        if s.binding.is_draining() {
            drain_limit = drain_limit.min(frames);
            if frames == 0 {
                tracing::debug!(stream = %id, "drain complete");
                doomed.push(id);
            }
        } else {
            write_limit = write_limit.min(frames);
            num_playing += 1;
        }
    }

    if num_playing == 0 {
        write_limit = drain_limit;
    }

    if write_limit > max_offset {
        dst[max_offset * stride..write_limit * stride].fill(0.0);
    }

    for s in streams.iter_mut() {
        if !live(s, doomed) || s.offset >= write_limit {
            continue;
        }
        let want = write_limit - s.offset;
        let region = &mut dst[s.offset * stride..write_limit * stride];
        match s.binding.mix(format, region, want) {
            Ok(mixed) => s.offset += mixed.min(want),
            Err(e) => {
                tracing::warn!(stream = %s.id(), error = %e, "mix failed, removing");
                doomed.push(s.id());
            }
        }
    }

    streams
        .iter()
        .filter(|s| live(s, doomed))
        .map(|s| s.offset)
        .min()
        .unwrap_or(0)
}

impl OpenDev {
    /// Request samples from every due stream on this device.
    fn fetch_streams(&mut self, now: Duration, fuzz: Duration) -> std::result::Result<(), DeviceError> {
        let idx = self.idx();
        let delay = self.dev.delay_frames()?;

        for s in &mut self.streams {
            let b = &mut s.binding;
            let id = b.stream_id();

            if b.is_pending_reply() {
                b.flush_stale_acks();
                b.record_fetch_interval(now);
            }
            if !b.is_running() || !is_time_to_fetch(b.as_ref(), now, fuzz) {
                continue;
            }
            if b.shm_frames() < 0 {
                tracing::warn!(stream = %id, dev = %idx, "corrupt shared buffer, draining");
                b.set_draining(true);
            }
            if b.is_draining() {
                continue;
            }
            if b.is_pending_reply() {
                tracing::trace!(stream = %id, "fetch skipped, reply pending");
                continue;
            }
            if !b.can_fetch() {
                tracing::trace!(stream = %id, "fetch skipped, buffer full");
                b.update_next_wake_time();
                continue;
            }

            b.set_delay(delay);
            tracing::trace!(stream = %id, dev = %idx, delay, "fetching samples");
            if let Err(e) = b.request_playback_samples(now) {
                tracing::warn!(stream = %id, error = %e, "fetch failed, draining");
                b.set_draining(true);
            }
        }
        Ok(())
    }

    /// Fill the device with as much mixed audio as the streams allow.
    fn write_output_samples(
        &mut self,
        ctx: WriteContext,
        doomed: &mut Vec<StreamId>,
    ) -> std::result::Result<usize, DeviceError> {
        self.dev.prepare_output_before_write()?;
        if self.dev.state() != DeviceState::NormalRun {
            return Ok(0);
        }

        let queued = self.dev.frames_queued()?;
        let hw_level = queued.frames;
        self.update_highest_hw_level(hw_level);
        if let Some(ts) = queued.timestamp {
            self.update_estimated_rate(hw_level, ts, ctx.master_rate_ratio);
        }

        let mut frames_to_request = buffer_avail(
            self.dev.buffer_size(),
            hw_level,
            self.dev.min_buffer_level(),
        );
        let format = self.dev.format();
        let stride = format.stride();
        let tick = &ctx.tick;

        let mut total_written = 0;
        let mut non_empty = false;
        let mut scanned = false;

        while total_written < frames_to_request {
            let wanted = frames_to_request - total_written;
            let dst = self.dev.get_output_buffer(wanted)?;
            let granted = (dst.len() / stride).min(wanted);
            if granted == 0 {
                break;
            }

            let written = write_streams(
                &mut self.streams,
                &format,
                &mut dst[..granted * stride],
                granted,
                doomed,
            );
            if written < granted {
                // Streams ran dry; stop after committing this chunk.
                frames_to_request = 0;
            }

            let check_pi = self
                .non_empty_check_pi
                .get_or_insert_with(|| PolledInterval::new(ctx.scan_interval, tick));
            let scan = self.empty_pi.is_some() || check_pi.elapsed(tick);
            if scan {
                check_pi.reset(tick);
                scanned = true;
            }

            let mut chunk_non_empty = false;
            self.dev
                .put_output_buffer(written, scan.then_some(&mut chunk_non_empty))?;
            non_empty |= chunk_non_empty;
            self.commit(written);
            total_written += written;

            if non_empty && self.empty_pi.take().is_some() {
                tracing::debug!(dev = %self.idx(), "output no longer empty");
            }
            if written == 0 {
                break;
            }
        }

        if scanned && !non_empty && self.empty_pi.is_none() {
            self.empty_pi = Some(PolledInterval::new(ctx.empty_period, tick));
            tracing::trace!(dev = %self.idx(), "output went silent");
        }

        Ok(total_written)
    }

    /// Schedule the device's next wake from its level. Returns the level.
    fn update_dev_wakeup_time(&mut self, now: Duration) -> usize {
        let hw_level = self.dev.frames_queued().map_or(0, |q| q.frames);
        let frames = frames_to_play_in_sleep(
            hw_level,
            !self.streams.is_empty(),
            self.dev.min_cb_level(),
        );
        self.wake_ts = now + frames_to_time_precise(frames, self.est_rate());
        hw_level
    }
}

impl Scheduler {
    /// Start due playback streams and request samples from due clients.
    pub fn playback_fetch(&mut self) {
        let now = self.now();
        let fuzz = self.config.playback_wake_fuzz();

        for adev in &mut self.devs[Direction::Output.index()] {
            let idx = adev.idx();
            for s in &mut adev.streams {
                if s.binding.is_running() {
                    continue;
                }
                if s.binding.next_cb_ts().is_some_and(|ts| now >= ts) {
                    s.binding.start();
                    s.offset = 0;
                    tracing::debug!(stream = %s.id(), dev = %idx, "playback stream started");
                }
            }
        }

        for adev in &mut self.devs[Direction::Output.index()] {
            if !adev.dev.is_open() {
                continue;
            }
            if let Err(e) = adev.fetch_streams(now, fuzz) {
                tracing::warn!(dev = %adev.idx(), error = %e, "fetch failed");
            }
        }
    }

    /// Mix into every open output device and schedule their wakes.
    pub fn playback_write(&mut self) -> Result<()> {
        let out = Direction::Output.index();
        let now = self.now();

        if self.devs[out].len() > 1 {
            for adev in &mut self.devs[out] {
                for s in &mut adev.streams {
                    s.binding.update_frames();
                }
            }
        }

        for idx in self.open_idxs(Direction::Output) {
            if !self.find(Direction::Output, idx).is_some_and(|a| a.dev.is_open()) {
                continue;
            }

            let total_written = match self.write_output_samples(idx) {
                Ok(frames) => frames,
                Err(e) => {
                    self.handle_dev_err(Direction::Output, idx, e);
                    continue;
                }
            };

            let Some(adev) = self.find_mut(Direction::Output, idx) else {
                continue;
            };
            if !adev.dev.should_wake() {
                continue;
            }
            let hw_level = adev.update_dev_wakeup_time(now);
            if hw_level > total_written {
                continue;
            }

            tracing::debug!(dev = %idx, hw_level, total_written, "output underrun");
            match adev.dev.output_underrun() {
                Ok(()) => {
                    adev.update_dev_wakeup_time(now);
                }
                Err(e) => self.handle_dev_err(Direction::Output, idx, e),
            }
        }

        for adev in &mut self.devs[out] {
            if !adev.dev.is_open() {
                continue;
            }
            for s in &mut adev.streams {
                s.binding.update_rstream();
            }
        }
        Ok(())
    }

    fn write_output_samples(&mut self, idx: DeviceIdx) -> std::result::Result<usize, DeviceError> {
        let ctx = WriteContext {
            tick: self.tick,
            master_rate_ratio: self.master_rate_ratio(),
            scan_interval: self.config.non_empty_update_interval(),
            empty_period: self.config.min_empty_period(),
        };
        let mut doomed = Vec::new();
        let result = match self.find_mut(Direction::Output, idx) {
            Some(adev) => adev.write_output_samples(ctx, &mut doomed),
            None => Ok(0),
        };
        for id in doomed {
            self.remove_stream(id, None);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, SimStream, SimStreamHandle};
    use cadence_config::ThreadConfig;
    use cadence_core::ManualClock;

    const T0: Duration = Duration::from_secs(100);

    fn scheduler(clock: &ManualClock) -> Scheduler {
        Scheduler::new(ThreadConfig::default(), Box::new(clock.clone()))
    }

    fn running_stream(
        s: &mut Scheduler,
        id: u32,
        devs: &[DeviceIdx],
        frames: i64,
    ) -> SimStreamHandle {
        let (stream, h) = SimStream::new(StreamId(id), Direction::Output, 480, 48_000);
        s.append_stream(&stream, devs).unwrap();
        for &d in devs {
            h.with_binding(d, |b| {
                b.running = true;
                b.playback_frames = frames;
            });
        }
        h
    }

    // --- helpers ---

    #[test]
    fn buffer_avail_saturates() {
        assert_eq!(buffer_avail(4096, 1000, 256), 2840);
        assert_eq!(buffer_avail(4096, 4000, 256), 0);
    }

    #[test]
    fn idle_device_wakes_one_callback_early() {
        assert_eq!(frames_to_play_in_sleep(960, true, 480), 960);
        assert_eq!(frames_to_play_in_sleep(960, false, 480), 480);
        assert_eq!(frames_to_play_in_sleep(100, false, 480), 0);
    }

    // --- fetch ---

    #[test]
    fn due_stream_starts_and_fetches() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        h.lock().delay_frames = 333;
        s.add_open_dev(Box::new(dev)).unwrap();
        let (stream, sh) = SimStream::new(StreamId(1), Direction::Output, 480, 48_000);
        s.append_stream(&stream, &[DeviceIdx(1)]).unwrap();

        s.tick.update(&clock);
        s.playback_fetch();

        let b = sh.binding(DeviceIdx(1)).unwrap();
        assert!(b.running);
        assert_eq!(b.delay, Some(333));
        assert_eq!(sh.lock().requests, 1);
    }

    #[test]
    fn fetch_allows_wake_fuzz() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 0);
        sh.with_binding(DeviceIdx(1), |b| {
            b.next_cb_ts = Some(T0 + Duration::from_micros(400));
        });

        s.tick.update(&clock);
        s.playback_fetch();
        assert_eq!(sh.lock().requests, 1);

        sh.lock().pending_reply = false;
        sh.with_binding(DeviceIdx(1), |b| {
            b.next_cb_ts = Some(T0 + Duration::from_micros(600));
        });
        s.playback_fetch();
        assert_eq!(sh.lock().requests, 1);
    }

    #[test]
    fn pending_reply_is_never_refetched() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 0);
        sh.with_binding(DeviceIdx(1), |b| b.next_cb_ts = Some(T0));
        sh.lock().pending_reply = true;

        s.tick.update(&clock);
        s.playback_fetch();

        let st = sh.lock();
        assert_eq!(st.requests, 0);
        assert_eq!(st.stale_ack_flushes, 1);
        assert_eq!(st.fetch_interval_records, 1);
    }

    #[test]
    fn full_buffer_defers_wake() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 0);
        sh.with_binding(DeviceIdx(1), |b| b.next_cb_ts = Some(T0));
        sh.lock().can_fetch = false;

        s.tick.update(&clock);
        s.playback_fetch();

        let st = sh.lock();
        assert_eq!(st.requests, 0);
        assert_eq!(st.next_wake_updates, 1);
    }

    #[test]
    fn negative_shm_level_starts_drain() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 0);
        sh.with_binding(DeviceIdx(1), |b| b.next_cb_ts = Some(T0));
        sh.lock().shm_frames = -1;

        s.tick.update(&clock);
        s.playback_fetch();

        let st = sh.lock();
        assert!(st.draining);
        assert_eq!(st.requests, 0);
    }

    #[test]
    fn failed_request_starts_drain() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 0);
        sh.with_binding(DeviceIdx(1), |b| b.next_cb_ts = Some(T0));
        sh.lock().fail_request = true;

        s.tick.update(&clock);
        s.playback_fetch();
        assert!(sh.lock().draining);
    }

    // --- write ---

    #[test]
    fn write_is_limited_by_slowest_stream() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 1);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = running_stream(&mut s, 1, &[DeviceIdx(1)], 300);
        let b = running_stream(&mut s, 2, &[DeviceIdx(1)], 100);
        a.lock().sample_value = 0.25;
        b.lock().sample_value = 0.5;

        s.tick.update(&clock);
        s.playback_write().unwrap();

        let st = h.lock();
        assert_eq!(st.put_calls, vec![100]);
        assert!(st.written.iter().all(|&x| (x - 0.75).abs() < 1e-6));
        assert_eq!(a.binding(DeviceIdx(1)).unwrap().mixed, vec![100]);
        assert_eq!(b.binding(DeviceIdx(1)).unwrap().mixed, vec![100]);
    }

    #[test]
    fn unwritten_region_is_zeroed() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 1);
        h.lock().stale_sample = 9.0;
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = running_stream(&mut s, 1, &[DeviceIdx(1)], 64);
        a.with_binding(DeviceIdx(1), |b| b.mix_limit = Some(16));

        s.tick.update(&clock);
        s.playback_write().unwrap();

        // The stream mixed 16 of its 64 frames. Only those are committed, and
        // stale data up to the write limit was cleared.
        let st = h.lock();
        assert_eq!(st.put_calls, vec![16]);
        assert_eq!(st.last_buffer[16..64], [0.0; 48]);
        assert_eq!(st.last_buffer[64], 9.0);
    }

    #[test]
    fn draining_stream_with_nothing_left_is_removed_everywhere() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        for i in 1..=2 {
            let (dev, _h) = SimDevice::output(DeviceIdx(i), 48_000, 2);
            s.add_open_dev(Box::new(dev)).unwrap();
        }
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1), DeviceIdx(2)], 0);
        sh.lock().draining = true;

        s.tick.update(&clock);
        s.playback_write().unwrap();

        assert_eq!(sh.attached_devices(), 0);
    }

    #[test]
    fn bad_frame_count_removes_stream_from_all_devices() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        for i in 1..=2 {
            let (dev, _h) = SimDevice::output(DeviceIdx(i), 48_000, 2);
            s.add_open_dev(Box::new(dev)).unwrap();
        }
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1), DeviceIdx(2)], 480);
        sh.with_binding(DeviceIdx(1), |b| b.playback_frames = -1);

        s.tick.update(&clock);
        s.playback_write().unwrap();

        assert!(!sh.is_bound(DeviceIdx(1)));
        assert!(!sh.is_bound(DeviceIdx(2)));
    }

    #[test]
    fn mix_failure_removes_stream() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 480);
        sh.with_binding(DeviceIdx(1), |b| b.mix_error = true);

        s.tick.update(&clock);
        s.playback_write().unwrap();
        assert!(!sh.is_bound(DeviceIdx(1)));
    }

    #[test]
    fn wrapped_buffer_is_written_in_chunks() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        {
            let mut st = h.lock();
            st.buffer_size = 1024;
            st.max_contiguous = Some(256);
        }
        s.add_open_dev(Box::new(dev)).unwrap();
        let _sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 600);

        s.tick.update(&clock);
        s.playback_write().unwrap();

        assert_eq!(h.lock().put_calls, vec![256, 256, 88]);
        assert_eq!(h.lock().hw_level, 600);
    }

    #[test]
    fn wake_follows_level_and_underrun_is_reported() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        h.lock().should_wake = true;
        s.add_open_dev(Box::new(dev)).unwrap();
        let _sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 480);

        s.tick.update(&clock);
        s.playback_write().unwrap();

        // 480 frames queued, all of them written this tick: that is an underrun.
        assert_eq!(h.lock().underrun_calls, 1);
        let adev = s.find(Direction::Output, DeviceIdx(1)).unwrap();
        assert_eq!(adev.wake_ts, T0 + Duration::from_millis(10));
    }

    #[test]
    fn queued_audio_above_written_is_not_an_underrun() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        {
            let mut st = h.lock();
            st.should_wake = true;
            st.hw_level = 960;
        }
        s.add_open_dev(Box::new(dev)).unwrap();
        let _sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 480);

        s.tick.update(&clock);
        s.playback_write().unwrap();

        assert_eq!(h.lock().underrun_calls, 0);
        let adev = s.find(Direction::Output, DeviceIdx(1)).unwrap();
        assert_eq!(adev.wake_ts, T0 + Duration::from_millis(30));
    }

    #[test]
    fn write_error_closes_device() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        h.lock().fail_put = Some(DeviceError::SevereUnderrun);
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 480);

        s.tick.update(&clock);
        s.playback_write().unwrap();

        assert!(!s.is_dev_open(Direction::Output, DeviceIdx(1)));
        assert_eq!(h.lock().reset_count, 1);
        assert!(!sh.is_bound(DeviceIdx(1)));
    }

    #[test]
    fn idle_device_is_skipped() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::output(DeviceIdx(1), 48_000, 2);
        h.lock().state = DeviceState::NoStreamRun;
        s.add_open_dev(Box::new(dev)).unwrap();
        let sh = running_stream(&mut s, 1, &[DeviceIdx(1)], 480);

        s.tick.update(&clock);
        s.playback_write().unwrap();

        assert!(h.lock().put_calls.is_empty());
        assert!(sh.binding(DeviceIdx(1)).unwrap().mixed.is_empty());
        assert_eq!(sh.lock().update_rstream_calls, 1);
    }
}
