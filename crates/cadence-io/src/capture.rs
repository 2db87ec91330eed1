//! Capture: reading input hardware into client streams.
//!
//! Every input device is read once per tick. The same hardware region is
//! offered to each attached stream at that stream's own offset; hardware
//! frames are only released once every participating stream has taken them.
//! Afterwards [`Scheduler::send_captured_samples`] posts the results to
//! clients, schedules each device's next wake and, when queued input has
//! grown too far behind, drops it.

use std::time::Duration;

use cadence_core::{Direction, frames_to_ms, frames_to_time, frames_to_time_precise};

use crate::device::{DeviceError, DeviceState, IoDevice, NodeType};
use crate::metrics::ThreadEvent;
use crate::open_dev::{AttachedStream, OpenDev};
use crate::scheduler::Scheduler;
use crate::stream::{StreamFlags, WakeTime};
use crate::{Error, Result};

/// Whether a binding takes frames in this tick.
fn takes_capture(s: &AttachedStream) -> bool {
    !(s.binding.flags().contains(StreamFlags::TRIGGER_ONLY) && s.binding.is_triggered())
}

/// Latest wake of an input device that keeps its level near half the buffer.
fn input_dev_max_wake_ts(
    dev: &dyn IoDevice,
    level: usize,
    now: Duration,
    floor: Duration,
) -> std::result::Result<Duration, DeviceError> {
    let rate = dev.format().frame_rate;
    let buffer_size = dev.buffer_size();
    if rate == 0 || buffer_size == 0 {
        return Err(DeviceError::InvalidArgument(format!(
            "rate {rate}, buffer size {buffer_size}"
        )));
    }
    let target = (buffer_size / 2).saturating_sub(level);
    Ok(now + frames_to_time(target, rate).max(floor))
}

impl OpenDev {
    /// Smallest free capture space among streams that take frames, and the
    /// position of the stream that set it.
    fn capture_limit(&mut self, log_overruns: bool) -> (usize, Option<usize>) {
        let mut limit = usize::MAX;
        let mut limiting = None;
        for (pos, s) in self.streams.iter_mut().enumerate() {
            if !takes_capture(s) {
                continue;
            }
            if log_overruns && s.binding.check_write_overrun() {
                tracing::debug!(stream = %s.id(), dev = %self.dev.idx(), "capture overrun");
            }
            let avail = s.binding.capture_avail();
            if avail < limit {
                limit = avail;
                limiting = Some(pos);
            }
        }
        (limit, limiting)
    }

    /// Copy hardware frames into every stream.
    fn capture_to_streams(
        &mut self,
        delay: usize,
        master_rate_ratio: f64,
    ) -> std::result::Result<(), DeviceError> {
        for s in &mut self.streams {
            s.binding.flush_stale_acks();
        }

        let queued = self.dev.frames_queued()?;
        let hw_level = queued.frames;
        self.update_highest_hw_level(hw_level);
        if let Some(ts) = queued.timestamp {
            if hw_level > 0 {
                self.input_streaming = true;
            }
            self.update_estimated_rate(hw_level, ts, master_rate_ratio);
        }

        let (cap_limit, _) = self.capture_limit(true);
        for s in &mut self.streams {
            s.binding.set_delay(delay);
        }

        if self.dev.state() != DeviceState::NormalRun {
            return Ok(());
        }

        let stride = self.dev.format().stride();
        let gain = self.dev.software_gain_scaler();
        let mut remainder = hw_level.min(cap_limit);

        while remainder > 0 {
            let src = self.dev.get_input_buffer(remainder)?;
            let nread = (src.len() / stride).min(remainder);
            if nread == 0 {
                break;
            }

            let mut consumed = nread;
            let mut any_taker = false;
            for s in &mut self.streams {
                if !takes_capture(s) {
                    continue;
                }
                any_taker = true;
                if s.offset < nread {
                    let scaler = if s.binding.has_active_apm() { 1.0 } else { gain };
                    let offered = nread - s.offset;
                    let region = &src[s.offset * stride..nread * stride];
                    let taken = s.binding.capture(region, offered, scaler);
                    s.offset += taken.min(offered);
                }
                consumed = consumed.min(s.offset);
            }
            if !any_taker {
                consumed = nread;
            }

            let released = self.dev.put_input_buffer(consumed)?;
            for s in &mut self.streams {
                s.offset = s.offset.saturating_sub(released);
            }

            remainder -= nread;
            if released < nread {
                break;
            }
        }
        Ok(())
    }

    /// Schedule the device's next wake from its streams' needs. Returns
    /// whether enough input has queued up that some should be dropped.
    ///
    /// The wake starts at the `max_sleep` ceiling, so a failed query never
    /// leaves a past wake time behind.
    fn set_input_dev_wake_ts(
        &mut self,
        now: Duration,
        max_sleep: Duration,
        min_input_wake: Duration,
        drop_threshold_ms: u64,
    ) -> Result<bool> {
        let idx = self.idx();
        self.wake_ts = now + max_sleep;
        let queued = self.dev.frames_queued().map_err(|e| Error::device(idx, e))?;
        let level = queued.frames;
        let level_ts = queued.timestamp.unwrap_or(now);
        let rate = self.dev.format().frame_rate;

        let need_to_drop = self.can_drop_samples()
            && level.saturating_mul(2) >= self.dev.largest_cb_level().saturating_mul(3)
            && frames_to_ms(level, rate) >= drop_threshold_ms;

        let (cap_limit, limiting) = self.capture_limit(false);
        let mut min_ts = now + max_sleep;
        for (pos, s) in self.streams.iter_mut().enumerate() {
            let id = s.id();
            match s
                .binding
                .wake_time(level, level_ts, cap_limit, limiting == Some(pos))
                .map_err(|e| Error::stream(id, e))?
            {
                WakeTime::At(ts) => min_ts = min_ts.min(ts),
                WakeTime::NotNeeded => {}
            }
        }

        let bounded = matches!(self.dev.active_node(), Some(node) if node != NodeType::Hotword);
        if cap_limit > 0 && bounded {
            match input_dev_max_wake_ts(self.dev.as_ref(), level, now, min_input_wake) {
                Ok(ts) => min_ts = min_ts.min(ts),
                Err(e) => tracing::error!(dev = %idx, error = %e, "cannot bound input wake"),
            }
        }

        self.wake_ts = min_ts;
        Ok(need_to_drop)
    }

    /// Post captured frames to clients.
    fn update_capture_streams(&mut self) {
        for s in &mut self.streams {
            s.binding.update_rstream();
        }
    }
}

impl Scheduler {
    /// Read every open input device into its streams.
    ///
    /// A device that fails is handled and removed; the remaining devices
    /// are still read.
    pub fn capture(&mut self) -> Result<()> {
        let master_ratio = self.master_rate_ratio();
        for idx in self.open_idxs(Direction::Input) {
            let delay = self.max_input_delay();
            let Some(adev) = self.find_mut(Direction::Input, idx) else {
                continue;
            };
            if !adev.dev.is_open() {
                continue;
            }
            if let Err(e) = adev.capture_to_streams(delay, master_ratio) {
                self.handle_dev_err(Direction::Input, idx, e);
            }
        }
        Ok(())
    }

    /// Post captured samples, schedule input wakes and drop stale input.
    ///
    /// Each device's streams are posted before its wake is scheduled. A
    /// device that fails its level query is handled and removed. A stream
    /// that cannot report its wake time does not stop the other devices;
    /// the first such error is returned once all have been serviced.
    pub fn send_captured_samples(&mut self) -> Result<()> {
        let now = self.now();
        let max_sleep = self.config.max_sleep();
        let min_input_wake = self.config.min_input_wake();
        let threshold_ms = self.config.drop_frames_threshold_ms;
        let mut need_to_drop = false;
        let mut first_err = None;

        for idx in self.open_idxs(Direction::Input) {
            let Some(adev) = self.find_mut(Direction::Input, idx) else {
                continue;
            };
            if !adev.dev.is_open() {
                continue;
            }
            adev.update_capture_streams();
            match adev.set_input_dev_wake_ts(now, max_sleep, min_input_wake, threshold_ms) {
                Ok(wants_drop) => need_to_drop |= wants_drop,
                Err(Error::Device { source, .. }) => {
                    self.handle_dev_err(Direction::Input, idx, source);
                }
                Err(e) => {
                    tracing::warn!(dev = %idx, error = %e, "input wake time unavailable");
                    first_err.get_or_insert(e);
                }
            }
        }

        if need_to_drop {
            self.drop_samples()?;
        }
        first_err.map_or(Ok(()), Err)
    }

    /// How much queued input every droppable device can lose.
    ///
    /// The smallest excess over the minimum callback level, zero as soon as
    /// any droppable device is at or below it.
    pub fn input_devices_drop_time(&mut self) -> Duration {
        let mut drop_time: Option<Duration> = None;
        for adev in &mut self.devs[Direction::Input.index()] {
            if !adev.can_drop_samples() {
                continue;
            }
            let level = match adev.dev.frames_queued() {
                Ok(q) => q.frames,
                Err(e) => {
                    tracing::warn!(dev = %adev.idx(), error = %e, "level unavailable for drop");
                    continue;
                }
            };
            let target = adev.dev.min_cb_level();
            if level <= target {
                return Duration::ZERO;
            }
            let excess = frames_to_time_precise(level - target, adev.est_rate());
            drop_time = Some(drop_time.map_or(excess, |d| d.min(excess)));
        }
        drop_time.unwrap_or(Duration::ZERO)
    }

    /// Drop the same duration of queued input from every droppable device.
    ///
    /// A device that fails to drop keeps its backlog; the others still drop.
    pub fn drop_samples(&mut self) -> Result<()> {
        let drop_time = self.input_devices_drop_time();
        if drop_time.is_zero() {
            return Ok(());
        }
        tracing::debug!(?drop_time, "dropping stale input");

        for adev in &mut self.devs[Direction::Input.index()] {
            if !adev.can_drop_samples() {
                continue;
            }
            let idx = adev.idx();
            match adev.dev.drop_frames_by_time(drop_time) {
                Ok(dropped) => tracing::trace!(dev = %idx, dropped, "input frames dropped"),
                Err(e) => tracing::warn!(dev = %idx, error = %e, "failed to drop input frames"),
            }
        }

        self.metrics.thread_event(ThreadEvent::DropSamples);
        self.counters.record_drop();
        Ok(())
    }

    /// Largest latency among open input devices.
    fn max_input_delay(&mut self) -> usize {
        self.devs[Direction::Input.index()]
            .iter_mut()
            .filter(|adev| adev.dev.is_open())
            .filter_map(|adev| adev.dev.delay_frames().ok())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRecord;
    use crate::sim::{RecordingMetrics, SimDevice, SimStream, SimStreamHandle};
    use cadence_config::ThreadConfig;
    use cadence_core::{DeviceIdx, ManualClock, StreamId};

    const T0: Duration = Duration::from_secs(100);

    fn scheduler(clock: &ManualClock) -> Scheduler {
        let mut s = Scheduler::new(ThreadConfig::default(), Box::new(clock.clone()));
        s.tick.update(clock);
        s
    }

    fn input_stream(s: &mut Scheduler, id: u32, dev: DeviceIdx, avail: usize) -> SimStreamHandle {
        let (stream, h) = SimStream::new(StreamId(id), Direction::Input, 480, 48_000);
        s.append_stream(&stream, &[dev]).unwrap();
        h.with_binding(dev, |b| b.capture_avail = avail);
        h
    }

    // --- capture ---

    #[test]
    fn capture_is_bounded_by_smallest_free_space() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 2000);
        let b = input_stream(&mut s, 2, DeviceIdx(1), 300);
        h.lock().hw_level = 1000;

        s.capture().unwrap();

        assert_eq!(a.binding(DeviceIdx(1)).unwrap().captured_frames(), 300);
        assert_eq!(b.binding(DeviceIdx(1)).unwrap().captured_frames(), 300);
        assert_eq!(h.lock().hw_level, 700);
    }

    #[test]
    fn triggered_trigger_only_stream_is_skipped() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 2000);
        let trig = input_stream(&mut s, 2, DeviceIdx(1), 0);
        {
            let mut st = trig.lock();
            st.flags = StreamFlags::TRIGGER_ONLY;
            st.triggered = true;
        }
        h.lock().hw_level = 500;

        s.capture().unwrap();

        assert_eq!(a.binding(DeviceIdx(1)).unwrap().captured_frames(), 500);
        assert!(trig.binding(DeviceIdx(1)).unwrap().captured.is_empty());
        assert_eq!(h.lock().hw_level, 0);
    }

    #[test]
    fn gain_is_skipped_for_processed_streams() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 1);
        h.lock().software_gain_scaler = 0.5;
        s.add_open_dev(Box::new(dev)).unwrap();
        let plain = input_stream(&mut s, 1, DeviceIdx(1), 100);
        let apm = input_stream(&mut s, 2, DeviceIdx(1), 100);
        apm.lock().has_apm = true;
        h.lock().hw_level = 10;

        s.capture().unwrap();

        assert_eq!(plain.binding(DeviceIdx(1)).unwrap().captured[0].1, 0.5);
        assert_eq!(apm.binding(DeviceIdx(1)).unwrap().captured[0].1, 1.0);
    }

    #[test]
    fn wrapped_input_is_read_in_chunks() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        {
            let mut st = h.lock();
            st.hw_level = 700;
            st.max_contiguous = Some(256);
        }

        s.capture().unwrap();

        let captured: Vec<usize> = a
            .binding(DeviceIdx(1))
            .unwrap()
            .captured
            .iter()
            .map(|c| c.0)
            .collect();
        assert_eq!(captured, vec![256, 256, 188]);
        assert_eq!(h.lock().hw_level, 0);
    }

    #[test]
    fn stopped_device_is_not_read() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        {
            let mut st = h.lock();
            st.hw_level = 700;
            st.state = DeviceState::Open;
            st.delay_frames = 42;
        }

        s.capture().unwrap();

        let b = a.binding(DeviceIdx(1)).unwrap();
        assert!(b.captured.is_empty());
        assert_eq!(b.delay, Some(42));
    }

    #[test]
    fn capture_error_closes_device() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let _a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        h.lock().fail_frames_queued = Some(DeviceError::Io("gone".into()));

        s.capture().unwrap();
        assert!(!s.is_dev_open(Direction::Input, DeviceIdx(1)));
    }

    // --- wake scheduling ---

    #[test]
    fn input_wake_is_bounded_by_half_buffer() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        h.lock().buffer_size = 4800;
        s.add_open_dev(Box::new(dev)).unwrap();
        let _a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        h.lock().hw_level = 1200;

        s.send_captured_samples().unwrap();

        // (2400 - 1200) frames at 48kHz = 25ms.
        let adev = s.find(Direction::Input, DeviceIdx(1)).unwrap();
        assert_eq!(adev.wake_ts, T0 + Duration::from_millis(25));
    }

    #[test]
    fn input_wake_has_a_floor() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        h.lock().buffer_size = 4800;
        s.add_open_dev(Box::new(dev)).unwrap();
        let _a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        h.lock().hw_level = 2390;

        s.send_captured_samples().unwrap();

        let adev = s.find(Direction::Input, DeviceIdx(1)).unwrap();
        assert_eq!(adev.wake_ts, T0 + Duration::from_millis(5));
    }

    #[test]
    fn earliest_stream_wake_wins() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        h.lock().buffer_size = 48_000;
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        let b = input_stream(&mut s, 2, DeviceIdx(1), 100);
        a.with_binding(DeviceIdx(1), |st| {
            st.wake_time = WakeTime::At(T0 + Duration::from_millis(8));
        });
        b.with_binding(DeviceIdx(1), |st| {
            st.wake_time = WakeTime::At(T0 + Duration::from_millis(3));
        });

        s.send_captured_samples().unwrap();

        let adev = s.find(Direction::Input, DeviceIdx(1)).unwrap();
        assert_eq!(adev.wake_ts, T0 + Duration::from_millis(3));
        // The stream with the least room is told it is limiting.
        assert!(b.binding(DeviceIdx(1)).unwrap().wake_args.unwrap().3);
        assert!(!a.binding(DeviceIdx(1)).unwrap().wake_args.unwrap().3);
    }

    #[test]
    fn hotword_device_ignores_buffer_bound() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 16_000, 1);
        {
            let mut st = h.lock();
            st.active_node = Some(NodeType::Hotword);
            st.buffer_size = 1600;
        }
        s.add_open_dev(Box::new(dev)).unwrap();
        let _a = input_stream(&mut s, 1, DeviceIdx(1), 5000);

        s.send_captured_samples().unwrap();

        let adev = s.find(Direction::Input, DeviceIdx(1)).unwrap();
        assert_eq!(adev.wake_ts, T0 + s.config().max_sleep());
    }

    #[test]
    fn streams_are_posted_before_wake_is_scheduled() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 5000);

        s.send_captured_samples().unwrap();

        assert_eq!(a.lock().update_rstream_calls, 1);
        assert_eq!(a.binding(DeviceIdx(1)).unwrap().posts_before_wake, Some(1));
    }

    #[test]
    fn idle_hotword_device_does_not_wake_the_thread() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 16_000, 1);
        h.lock().active_node = Some(NodeType::Hotword);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        a.with_binding(DeviceIdx(1), |b| {
            b.wake_time = WakeTime::At(T0 + Duration::from_millis(10));
        });

        for _ in 0..3 {
            s.run();
            assert_eq!(s.next_sleep(), None);
        }

        // The DSP triggers and frames start arriving.
        {
            let mut st = h.lock();
            st.hw_level = 160;
            st.timestamp = Some(T0);
        }
        s.run();
        assert_eq!(s.next_sleep(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn failed_level_query_closes_only_that_device() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (a, ha) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        let (b, _hb) = SimDevice::input(DeviceIdx(2), 48_000, 2);
        s.add_open_dev(Box::new(a)).unwrap();
        s.add_open_dev(Box::new(b)).unwrap();
        let _sa = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        let sb = input_stream(&mut s, 2, DeviceIdx(2), 5000);
        ha.lock().fail_frames_queued = Some(DeviceError::Io("gone".into()));

        s.send_captured_samples().unwrap();

        assert!(!s.is_dev_open(Direction::Input, DeviceIdx(1)));
        assert_eq!(sb.lock().update_rstream_calls, 1);
        let wake = s.find(Direction::Input, DeviceIdx(2)).unwrap().wake_ts;
        assert!(wake > T0 && wake < T0 + s.config().max_sleep());
    }

    #[test]
    fn wake_error_leaves_no_stale_wake_and_spares_other_devices() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (a, _ha) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        let (b, _hb) = SimDevice::input(DeviceIdx(2), 48_000, 2);
        s.add_open_dev(Box::new(a)).unwrap();
        s.add_open_dev(Box::new(b)).unwrap();
        let sa = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        let sb = input_stream(&mut s, 2, DeviceIdx(2), 5000);
        sa.with_binding(DeviceIdx(1), |b| b.wake_error = true);
        s.find_mut(Direction::Input, DeviceIdx(1)).unwrap().wake_ts = Duration::from_secs(1);

        let err = s.send_captured_samples().unwrap_err();

        assert!(matches!(err, Error::Stream { id: StreamId(1), .. }));
        let max_sleep = s.config().max_sleep();
        assert_eq!(s.find(Direction::Input, DeviceIdx(1)).unwrap().wake_ts, T0 + max_sleep);
        assert!(sb.binding(DeviceIdx(2)).unwrap().posts_before_wake.is_some());
        assert!(s.next_sleep().is_some_and(|d| d > Duration::ZERO));
    }

    #[test]
    fn wake_time_error_is_reported() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, _h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(dev)).unwrap();
        let a = input_stream(&mut s, 1, DeviceIdx(1), 5000);
        a.with_binding(DeviceIdx(1), |b| b.wake_error = true);

        let err = s.send_captured_samples().unwrap_err();
        assert!(matches!(err, Error::Stream { id: StreamId(1), .. }));
    }

    // --- drop ---

    #[test]
    fn high_latency_input_is_dropped_to_min_cb_level() {
        let clock = ManualClock::new(T0);
        let (metrics, records) = RecordingMetrics::new();
        let mut s = Scheduler::new(ThreadConfig::default(), Box::new(clock.clone()))
            .with_metrics(Box::new(metrics));
        s.tick.update(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        {
            let mut st = h.lock();
            st.buffer_size = 48_000;
            st.largest_cb_level = 480;
            st.min_cb_level = 480;
        }
        s.add_open_dev(Box::new(dev)).unwrap();
        let _a = input_stream(&mut s, 1, DeviceIdx(1), 0);
        // 100ms queued: above both 1.5 callbacks and the 50ms threshold.
        h.lock().hw_level = 4800;

        s.send_captured_samples().unwrap();

        // (4800 - 480) frames at 48kHz = 90ms.
        assert_eq!(h.lock().drop_calls, vec![Duration::from_millis(90)]);
        assert!(
            records
                .lock()
                .contains(&MetricRecord::Event(ThreadEvent::DropSamples))
        );
    }

    #[test]
    fn short_backlog_is_kept() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (dev, h) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        {
            let mut st = h.lock();
            st.buffer_size = 48_000;
            st.largest_cb_level = 480;
        }
        s.add_open_dev(Box::new(dev)).unwrap();
        let _a = input_stream(&mut s, 1, DeviceIdx(1), 0);
        // 40ms queued is under the 50ms threshold.
        h.lock().hw_level = 1920;

        s.send_captured_samples().unwrap();
        assert!(h.lock().drop_calls.is_empty());
    }

    #[test]
    fn device_at_target_blocks_all_drops() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (a, ha) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        let (b, hb) = SimDevice::input(DeviceIdx(2), 48_000, 2);
        s.add_open_dev(Box::new(a)).unwrap();
        s.add_open_dev(Box::new(b)).unwrap();
        let _sa = input_stream(&mut s, 1, DeviceIdx(1), 0);
        let _sb = input_stream(&mut s, 2, DeviceIdx(2), 0);
        ha.lock().hw_level = 9600;
        hb.lock().hw_level = 100;

        assert_eq!(s.input_devices_drop_time(), Duration::ZERO);
        s.drop_samples().unwrap();
        assert!(ha.lock().drop_calls.is_empty());
    }

    #[test]
    fn drop_time_is_the_smallest_excess() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (a, ha) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        let (b, hb) = SimDevice::input(DeviceIdx(2), 48_000, 2);
        s.add_open_dev(Box::new(a)).unwrap();
        s.add_open_dev(Box::new(b)).unwrap();
        let _sa = input_stream(&mut s, 1, DeviceIdx(1), 0);
        let _sb = input_stream(&mut s, 2, DeviceIdx(2), 0);
        ha.lock().hw_level = 4800 + 480;
        hb.lock().hw_level = 2400 + 480;

        assert_eq!(s.input_devices_drop_time(), Duration::from_millis(50));
    }

    #[test]
    fn failed_drop_does_not_stop_other_devices() {
        let clock = ManualClock::new(T0);
        let (metrics, records) = RecordingMetrics::new();
        let mut s = Scheduler::new(ThreadConfig::default(), Box::new(clock.clone()))
            .with_metrics(Box::new(metrics));
        s.tick.update(&clock);
        let (a, ha) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        let (b, hb) = SimDevice::input(DeviceIdx(2), 48_000, 2);
        s.add_open_dev(Box::new(a)).unwrap();
        s.add_open_dev(Box::new(b)).unwrap();
        let _sa = input_stream(&mut s, 1, DeviceIdx(1), 0);
        let _sb = input_stream(&mut s, 2, DeviceIdx(2), 0);
        for h in [&ha, &hb] {
            let mut st = h.lock();
            st.buffer_size = 48_000;
            st.hw_level = 4800 + 480;
        }
        ha.lock().fail_drop = Some(DeviceError::Io("busy".into()));

        s.drop_samples().unwrap();

        assert_eq!(ha.lock().hw_level, 4800 + 480);
        assert_eq!(hb.lock().drop_calls, vec![Duration::from_millis(100)]);
        assert_eq!(hb.lock().hw_level, 480);
        assert!(
            records
                .lock()
                .contains(&MetricRecord::Event(ThreadEvent::DropSamples))
        );
    }

    #[test]
    fn nothing_droppable_means_zero() {
        let clock = ManualClock::new(T0);
        let mut s = scheduler(&clock);
        let (a, ha) = SimDevice::input(DeviceIdx(1), 48_000, 2);
        s.add_open_dev(Box::new(a)).unwrap();
        ha.lock().hw_level = 9600;
        assert_eq!(s.input_devices_drop_time(), Duration::ZERO);
    }
}
