//! Scripted devices, streams and metrics for tests, benches and CI.
//!
//! Nothing here touches real hardware or time. A [`SimDevice`] holds a
//! fill level that only moves when the thread writes or reads it, or when a
//! test calls [`SimDeviceHandle::play`] / [`SimDeviceHandle::record`]. A
//! [`SimStream`] answers every [`DevStream`] query from fields a test can set.
//!
//! Every constructor returns the object together with a handle sharing its
//! state, so a test can hand the object to the scheduler and keep inspecting
//! or scripting it afterwards.
//!
//! ```rust
//! use cadence_core::{DeviceIdx, Direction, StreamId};
//! use cadence_io::sim::{SimDevice, SimStream};
//!
//! let (_device, dev) = SimDevice::output(DeviceIdx(1), 48_000, 2);
//! dev.lock().hw_level = 960;
//! dev.play(480);
//! assert_eq!(dev.lock().hw_level, 480);
//!
//! let (_stream, stream) = SimStream::new(StreamId(1), Direction::Output, 480, 48_000);
//! stream.lock().shm_frames = 480;
//! ```

use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{DeviceIdx, Direction, StreamId, frames_to_time, time_to_frames};

use crate::device::{AudioFormat, DeviceError, DeviceState, IoDevice, NodeType, QueuedFrames};
use crate::metrics::{MetricRecord, MetricsSink, ThreadEvent};
use crate::stream::{BindTarget, ClientStream, DevStream, StreamError, StreamFlags, WakeTime};

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Scriptable state of a [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimDeviceState {
    /// Frames per second.
    pub frame_rate: u32,
    /// Channels per frame.
    pub num_channels: usize,
    /// Hardware buffer size in frames.
    pub buffer_size: usize,
    /// Reported smallest callback level.
    pub min_cb_level: usize,
    /// Reported largest running callback level.
    pub max_cb_level: usize,
    /// Reported largest callback level ever attached.
    pub largest_cb_level: usize,
    /// Frames kept queued.
    pub min_buffer_level: usize,
    /// Capture gain.
    pub software_gain_scaler: f32,
    /// Active node type.
    pub active_node: Option<NodeType>,
    /// Underrun count reported at close.
    pub num_underruns: u32,
    /// Open flag.
    pub open: bool,
    /// Run state.
    pub state: DeviceState,
    /// Whether the device asks for wakes.
    pub should_wake: bool,
    /// Frames queued in hardware.
    pub hw_level: usize,
    /// Timestamp reported with the level.
    pub timestamp: Option<Duration>,
    /// Reported latency in frames.
    pub delay_frames: usize,
    /// Reported rate ratio.
    pub est_rate_ratio: f64,
    /// Whether level samples report a rate change.
    pub rate_changes: bool,
    /// Largest contiguous region handed out, to emulate ring wraparound.
    pub max_contiguous: Option<usize>,
    /// Value left in output buffers from earlier periods.
    pub stale_sample: f32,
    /// Value of every captured sample.
    pub input_sample: f32,
    /// Keep committed output samples in `written`.
    pub record_samples: bool,
    /// Error returned from level queries.
    pub fail_frames_queued: Option<DeviceError>,
    /// Error returned when committing output.
    pub fail_put: Option<DeviceError>,
    /// Error returned from underrun handling.
    pub fail_underrun: Option<DeviceError>,
    /// Error returned when dropping queued input.
    pub fail_drop: Option<DeviceError>,

    /// Committed output samples.
    pub written: Vec<f32>,
    /// Full contents of the last output buffer at commit time.
    pub last_buffer: Vec<f32>,
    /// Frames of each output commit.
    pub put_calls: Vec<usize>,
    /// Commits that asked for the non-empty flag.
    pub scans: usize,
    /// Input frames released back to hardware.
    pub consumed_input: usize,
    /// Resets after errors.
    pub reset_count: usize,
    /// Underrun notifications.
    pub underrun_calls: usize,
    /// Durations passed to drops.
    pub drop_calls: Vec<Duration>,
    /// Flushes.
    pub flush_count: usize,
    /// Level samples fed to the rate estimator.
    pub rate_updates: Vec<(usize, Duration)>,
}

impl SimDeviceState {
    fn new(frame_rate: u32, num_channels: usize) -> Self {
        Self {
            frame_rate,
            num_channels,
            buffer_size: 4096,
            min_cb_level: 480,
            max_cb_level: 480,
            largest_cb_level: 480,
            min_buffer_level: 0,
            software_gain_scaler: 1.0,
            active_node: Some(NodeType::Normal),
            num_underruns: 0,
            open: true,
            state: DeviceState::NormalRun,
            should_wake: false,
            hw_level: 0,
            timestamp: None,
            delay_frames: 0,
            est_rate_ratio: 1.0,
            rate_changes: false,
            max_contiguous: None,
            stale_sample: 0.0,
            input_sample: 0.25,
            record_samples: true,
            fail_frames_queued: None,
            fail_put: None,
            fail_underrun: None,
            fail_drop: None,
            written: Vec::new(),
            last_buffer: Vec::new(),
            put_calls: Vec::new(),
            scans: 0,
            consumed_input: 0,
            reset_count: 0,
            underrun_calls: 0,
            drop_calls: Vec::new(),
            flush_count: 0,
            rate_updates: Vec::new(),
        }
    }

    fn contiguous(&self, frames: usize) -> usize {
        frames.min(self.max_contiguous.unwrap_or(usize::MAX))
    }
}

/// Shared view of a [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimDeviceHandle(Arc<Mutex<SimDeviceState>>);

impl SimDeviceHandle {
    /// Lock the device state.
    pub fn lock(&self) -> MutexGuard<'_, SimDeviceState> {
        self.0.lock()
    }

    /// Hardware plays `frames` out of the output buffer.
    pub fn play(&self, frames: usize) {
        let mut st = self.0.lock();
        st.hw_level = st.hw_level.saturating_sub(frames);
    }

    /// Hardware captures `frames` into the input buffer, up to its size.
    pub fn record(&self, frames: usize) {
        let mut st = self.0.lock();
        st.hw_level = (st.hw_level + frames).min(st.buffer_size);
    }
}

/// A device whose level is moved by hand.
#[derive(Debug)]
pub struct SimDevice {
    idx: DeviceIdx,
    direction: Direction,
    name: String,
    state: Arc<Mutex<SimDeviceState>>,
    buffer: Vec<f32>,
}

impl SimDevice {
    /// A device for `direction`.
    pub fn new(
        idx: DeviceIdx,
        direction: Direction,
        frame_rate: u32,
        num_channels: usize,
    ) -> (Self, SimDeviceHandle) {
        let state = Arc::new(Mutex::new(SimDeviceState::new(frame_rate, num_channels)));
        let device = Self {
            idx,
            direction,
            name: format!("sim-{direction}-{}", idx.0),
            state: Arc::clone(&state),
            buffer: Vec::new(),
        };
        (device, SimDeviceHandle(state))
    }

    /// A playback device.
    pub fn output(idx: DeviceIdx, frame_rate: u32, num_channels: usize) -> (Self, SimDeviceHandle) {
        Self::new(idx, Direction::Output, frame_rate, num_channels)
    }

    /// A capture device.
    pub fn input(idx: DeviceIdx, frame_rate: u32, num_channels: usize) -> (Self, SimDeviceHandle) {
        Self::new(idx, Direction::Input, frame_rate, num_channels)
    }

    /// Rename the device.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl IoDevice for SimDevice {
    fn idx(&self) -> DeviceIdx {
        self.idx
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        let st = self.state.lock();
        AudioFormat::new(st.frame_rate, st.num_channels)
    }

    fn buffer_size(&self) -> usize {
        self.state.lock().buffer_size
    }

    fn min_cb_level(&self) -> usize {
        self.state.lock().min_cb_level
    }

    fn max_cb_level(&self) -> usize {
        self.state.lock().max_cb_level
    }

    fn largest_cb_level(&self) -> usize {
        self.state.lock().largest_cb_level
    }

    fn min_buffer_level(&self) -> usize {
        self.state.lock().min_buffer_level
    }

    fn software_gain_scaler(&self) -> f32 {
        self.state.lock().software_gain_scaler
    }

    fn active_node(&self) -> Option<NodeType> {
        self.state.lock().active_node
    }

    fn num_underruns(&self) -> u32 {
        self.state.lock().num_underruns
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn state(&self) -> DeviceState {
        self.state.lock().state
    }

    fn frames_queued(&mut self) -> Result<QueuedFrames, DeviceError> {
        let st = self.state.lock();
        if let Some(e) = &st.fail_frames_queued {
            return Err(e.clone());
        }
        Ok(QueuedFrames {
            frames: st.hw_level,
            timestamp: st.timestamp,
        })
    }

    fn delay_frames(&mut self) -> Result<usize, DeviceError> {
        Ok(self.state.lock().delay_frames)
    }

    fn get_output_buffer(&mut self, frames: usize) -> Result<&mut [f32], DeviceError> {
        let (len, stale) = {
            let st = self.state.lock();
            if !st.open {
                return Err(DeviceError::NotOpen);
            }
            let space = st.buffer_size.saturating_sub(st.hw_level);
            let granted = st.contiguous(frames.min(space));
            (granted * st.num_channels.max(1), st.stale_sample)
        };
        self.buffer.clear();
        self.buffer.resize(len, stale);
        Ok(&mut self.buffer)
    }

    fn put_output_buffer(
        &mut self,
        frames: usize,
        non_empty: Option<&mut bool>,
    ) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        if let Some(e) = &st.fail_put {
            return Err(e.clone());
        }
        let committed = &self.buffer[..(frames * st.num_channels.max(1)).min(self.buffer.len())];
        if st.record_samples {
            st.written.extend_from_slice(committed);
            st.last_buffer.clone_from(&self.buffer);
        }
        if let Some(flag) = non_empty {
            st.scans += 1;
            if committed.iter().any(|&x| x != 0.0) {
                *flag = true;
            }
        }
        st.put_calls.push(frames);
        st.hw_level += frames;
        Ok(())
    }

    fn get_input_buffer(&mut self, frames: usize) -> Result<&[f32], DeviceError> {
        let (len, sample) = {
            let st = self.state.lock();
            if !st.open {
                return Err(DeviceError::NotOpen);
            }
            let granted = st.contiguous(frames.min(st.hw_level));
            (granted * st.num_channels.max(1), st.input_sample)
        };
        self.buffer.clear();
        self.buffer.resize(len, sample);
        Ok(&self.buffer)
    }

    fn put_input_buffer(&mut self, frames: usize) -> Result<usize, DeviceError> {
        let mut st = self.state.lock();
        let consumed = frames.min(st.hw_level);
        st.hw_level -= consumed;
        st.consumed_input += consumed;
        Ok(consumed)
    }

    fn should_wake(&self) -> bool {
        self.state.lock().should_wake
    }

    fn update_rate(&mut self, level: usize, timestamp: Duration) -> bool {
        let mut st = self.state.lock();
        st.rate_updates.push((level, timestamp));
        st.rate_changes
    }

    fn est_rate_ratio(&self) -> f64 {
        self.state.lock().est_rate_ratio
    }

    fn output_underrun(&mut self) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        st.underrun_calls += 1;
        match &st.fail_underrun {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn reset_on_error(&mut self) {
        let mut st = self.state.lock();
        st.reset_count += 1;
        st.hw_level = 0;
    }

    fn drop_frames_by_time(&mut self, duration: Duration) -> Result<usize, DeviceError> {
        let mut st = self.state.lock();
        st.drop_calls.push(duration);
        if let Some(e) = &st.fail_drop {
            return Err(e.clone());
        }
        let frames = time_to_frames(duration, st.frame_rate).min(st.hw_level);
        st.hw_level -= frames;
        Ok(frames)
    }

    fn flush_buffer(&mut self) -> Result<usize, DeviceError> {
        let mut st = self.state.lock();
        st.flush_count += 1;
        Ok(std::mem::take(&mut st.hw_level))
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Per-device state of a [`SimStream`] binding.
#[derive(Debug, Clone)]
pub struct SimBindingState {
    /// First callback time given at bind.
    pub init_cb_ts: Option<Duration>,
    /// Next callback time.
    pub next_cb_ts: Option<Duration>,
    /// Running flag.
    pub running: bool,
    /// Last latency set by the thread.
    pub delay: Option<usize>,
    /// Frames ready for this device. Negative reports an error.
    pub playback_frames: i64,
    /// Frames mixed per call.
    pub mixed: Vec<usize>,
    /// Cap on frames mixed per call.
    pub mix_limit: Option<usize>,
    /// Fail every mix.
    pub mix_error: bool,
    /// Free capture space in frames.
    pub capture_avail: usize,
    /// Frames and gain of each capture.
    pub captured: Vec<(usize, f32)>,
    /// Answer to wake-time queries.
    pub wake_time: WakeTime,
    /// Fail wake-time queries.
    pub wake_error: bool,
    /// Arguments of the last wake-time query.
    pub wake_args: Option<(usize, Duration, usize, bool)>,
    /// Posts (`update_rstream` calls) the stream had seen at the last
    /// wake-time query.
    pub posts_before_wake: Option<usize>,
    /// Last rate propagated by the device.
    pub dev_rate: Option<(u32, f64, f64, i32)>,
    /// Report an overrun on the next check.
    pub overrun: bool,
}

impl SimBindingState {
    fn new(init_cb_ts: Option<Duration>) -> Self {
        Self {
            init_cb_ts,
            next_cb_ts: init_cb_ts,
            running: false,
            delay: None,
            playback_frames: 0,
            mixed: Vec::new(),
            mix_limit: None,
            mix_error: false,
            capture_avail: 0,
            captured: Vec::new(),
            wake_time: WakeTime::NotNeeded,
            wake_error: false,
            wake_args: None,
            posts_before_wake: None,
            dev_rate: None,
            overrun: false,
        }
    }

    /// Total frames captured.
    pub fn captured_frames(&self) -> usize {
        self.captured.iter().map(|c| c.0).sum()
    }
}

/// Scriptable state of a [`SimStream`], shared by all its bindings.
#[derive(Debug, Clone)]
pub struct SimStreamState {
    /// Stream id.
    pub id: StreamId,
    /// Stream direction.
    pub direction: Direction,
    /// Frames per callback.
    pub cb_threshold: usize,
    /// Client rate.
    pub frame_rate: u32,
    /// Behaviour flags.
    pub flags: StreamFlags,
    /// Trigger-only stream already fired.
    pub triggered: bool,
    /// Audio processing active.
    pub has_apm: bool,
    /// Draining flag.
    pub draining: bool,
    /// A fetch is waiting for its reply.
    pub pending_reply: bool,
    /// Frames queued in the shared buffer.
    pub shm_frames: i64,
    /// Room for another callback.
    pub can_fetch: bool,
    /// Answer fetches immediately with one callback of frames.
    pub auto_reply: bool,
    /// Fail every fetch.
    pub fail_request: bool,
    /// Refuse to bind to this device.
    pub fail_bind_on: Option<DeviceIdx>,
    /// Reported longest fetch interval.
    pub longest_fetch_interval: Duration,
    /// Reported callback period.
    pub sleep_interval: Duration,
    /// Value added to every mixed sample.
    pub sample_value: f32,

    /// Fetches requested.
    pub requests: usize,
    /// Stale-ack flushes.
    pub stale_ack_flushes: usize,
    /// Fetch intervals recorded.
    pub fetch_interval_records: usize,
    /// Wake times pushed without a fetch.
    pub next_wake_updates: usize,
    /// Progress publications.
    pub update_rstream_calls: usize,
    /// Frame count refreshes.
    pub update_frames_calls: usize,
    /// Bindings created.
    pub bind_count: usize,
    /// Live bindings by device.
    pub bindings: BTreeMap<DeviceIdx, SimBindingState>,
}

/// Shared view of a [`SimStream`].
#[derive(Debug, Clone)]
pub struct SimStreamHandle(Arc<Mutex<SimStreamState>>);

impl SimStreamHandle {
    /// Lock the stream state.
    pub fn lock(&self) -> MutexGuard<'_, SimStreamState> {
        self.0.lock()
    }

    /// Copy of the binding on `dev`.
    pub fn binding(&self, dev: DeviceIdx) -> Option<SimBindingState> {
        self.0.lock().bindings.get(&dev).cloned()
    }

    /// Edit the binding on `dev`, if bound.
    pub fn with_binding<R>(&self, dev: DeviceIdx, f: impl FnOnce(&mut SimBindingState) -> R) -> Option<R> {
        self.0.lock().bindings.get_mut(&dev).map(f)
    }

    /// Whether a binding on `dev` is alive.
    pub fn is_bound(&self, dev: DeviceIdx) -> bool {
        self.0.lock().bindings.contains_key(&dev)
    }

    /// Number of live bindings.
    pub fn attached_devices(&self) -> usize {
        self.0.lock().bindings.len()
    }
}

/// A client stream answering from scripted state.
#[derive(Debug)]
pub struct SimStream {
    state: Arc<Mutex<SimStreamState>>,
}

impl SimStream {
    /// A stream of `cb_threshold` frames per callback at `frame_rate`.
    pub fn new(
        id: StreamId,
        direction: Direction,
        cb_threshold: usize,
        frame_rate: u32,
    ) -> (Self, SimStreamHandle) {
        let state = SimStreamState {
            id,
            direction,
            cb_threshold,
            frame_rate,
            flags: StreamFlags::empty(),
            triggered: false,
            has_apm: false,
            draining: false,
            pending_reply: false,
            shm_frames: 0,
            can_fetch: true,
            auto_reply: false,
            fail_request: false,
            fail_bind_on: None,
            longest_fetch_interval: Duration::ZERO,
            sleep_interval: frames_to_time(cb_threshold, frame_rate),
            sample_value: 0.0,
            requests: 0,
            stale_ack_flushes: 0,
            fetch_interval_records: 0,
            next_wake_updates: 0,
            update_rstream_calls: 0,
            update_frames_calls: 0,
            bind_count: 0,
            bindings: BTreeMap::new(),
        };
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimStreamHandle(state),
        )
    }
}

impl ClientStream for SimStream {
    fn id(&self) -> StreamId {
        self.state.lock().id
    }

    fn direction(&self) -> Direction {
        self.state.lock().direction
    }

    fn cb_threshold(&self) -> usize {
        self.state.lock().cb_threshold
    }

    fn frame_rate(&self) -> u32 {
        self.state.lock().frame_rate
    }

    fn bind(&self, target: &BindTarget) -> Result<Box<dyn DevStream>, StreamError> {
        let mut st = self.state.lock();
        if st.fail_bind_on == Some(target.idx) {
            return Err(StreamError::Bind(format!("refused {}", target.idx)));
        }
        st.bind_count += 1;
        st.bindings
            .insert(target.idx, SimBindingState::new(target.init_cb_ts));
        Ok(Box::new(SimBinding {
            dev: target.idx,
            state: Arc::clone(&self.state),
        }))
    }
}

/// One device's binding of a [`SimStream`].
struct SimBinding {
    dev: DeviceIdx,
    state: Arc<Mutex<SimStreamState>>,
}

impl SimBinding {
    fn with<R>(&self, f: impl FnOnce(&mut SimStreamState, &mut SimBindingState) -> R) -> Option<R> {
        let mut st = self.state.lock();
        let mut b = st.bindings.remove(&self.dev)?;
        let r = f(&mut *st, &mut b);
        st.bindings.insert(self.dev, b);
        Some(r)
    }

    fn read<R>(&self, f: impl FnOnce(&SimStreamState, Option<&SimBindingState>) -> R) -> R {
        let st = self.state.lock();
        f(&*st, st.bindings.get(&self.dev))
    }
}

impl Drop for SimBinding {
    fn drop(&mut self) {
        self.state.lock().bindings.remove(&self.dev);
    }
}

impl DevStream for SimBinding {
    fn stream_id(&self) -> StreamId {
        self.state.lock().id
    }

    fn flags(&self) -> StreamFlags {
        self.state.lock().flags
    }

    fn cb_threshold(&self) -> usize {
        self.state.lock().cb_threshold
    }

    fn frame_rate(&self) -> u32 {
        self.state.lock().frame_rate
    }

    fn is_running(&self) -> bool {
        self.read(|_, b| b.is_some_and(|b| b.running))
    }

    fn start(&mut self) {
        self.with(|_, b| b.running = true);
    }

    fn next_cb_ts(&self) -> Option<Duration> {
        self.read(|_, b| b.and_then(|b| b.next_cb_ts))
    }

    fn is_pending_reply(&self) -> bool {
        self.state.lock().pending_reply
    }

    fn flush_stale_acks(&mut self) {
        self.state.lock().stale_ack_flushes += 1;
    }

    fn record_fetch_interval(&mut self, _now: Duration) {
        self.state.lock().fetch_interval_records += 1;
    }

    fn shm_frames(&self) -> i64 {
        self.state.lock().shm_frames
    }

    fn can_fetch(&self) -> bool {
        self.state.lock().can_fetch
    }

    fn update_next_wake_time(&mut self) {
        self.with(|st, b| {
            st.next_wake_updates += 1;
            b.next_cb_ts = b.next_cb_ts.map(|ts| ts + st.sleep_interval);
        });
    }

    fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    fn set_draining(&mut self, draining: bool) {
        self.state.lock().draining = draining;
    }

    fn set_delay(&mut self, frames: usize) {
        self.with(|_, b| b.delay = Some(frames));
    }

    fn request_playback_samples(&mut self, now: Duration) -> Result<(), StreamError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        st.requests += 1;
        if st.fail_request {
            return Err(StreamError::Fetch("client gone".into()));
        }
        let period = st.sleep_interval;
        let cb = st.cb_threshold;
        if let Some(b) = st.bindings.get_mut(&self.dev) {
            let base = b.next_cb_ts.unwrap_or(now);
            b.next_cb_ts = Some(base + period);
        }
        if st.auto_reply {
            st.shm_frames += cb as i64;
            for b in st.bindings.values_mut() {
                b.playback_frames += cb as i64;
            }
        } else {
            st.pending_reply = true;
        }
        Ok(())
    }

    fn update_frames(&mut self) {
        self.state.lock().update_frames_calls += 1;
    }

    fn attached_device_count(&self) -> usize {
        self.state.lock().bindings.len()
    }

    fn playback_frames(&self) -> Result<usize, StreamError> {
        let frames = self.read(|_, b| b.map_or(0, |b| b.playback_frames));
        usize::try_from(frames).map_err(|_| StreamError::Frames)
    }

    fn mix(
        &mut self,
        format: &AudioFormat,
        dst: &mut [f32],
        frames: usize,
    ) -> Result<usize, StreamError> {
        let stride = format.stride();
        self.with(|st, b| {
            if b.mix_error {
                return Err(StreamError::Mix);
            }
            let avail = usize::try_from(b.playback_frames).unwrap_or(0);
            let n = frames
                .min(avail)
                .min(b.mix_limit.unwrap_or(usize::MAX))
                .min(dst.len() / stride);
            for x in &mut dst[..n * stride] {
                *x += st.sample_value;
            }
            b.playback_frames -= n as i64;
            st.shm_frames -= n as i64;
            b.mixed.push(n);
            Ok(n)
        })
        .unwrap_or(Err(StreamError::Mix))
    }

    fn update_rstream(&mut self) {
        self.state.lock().update_rstream_calls += 1;
    }

    fn capture_avail(&self) -> usize {
        self.read(|_, b| b.map_or(0, |b| b.capture_avail))
    }

    fn check_write_overrun(&mut self) -> bool {
        self.with(|_, b| std::mem::take(&mut b.overrun))
            .unwrap_or(false)
    }

    fn is_triggered(&self) -> bool {
        self.state.lock().triggered
    }

    fn has_active_apm(&self) -> bool {
        self.state.lock().has_apm
    }

    fn capture(&mut self, _src: &[f32], frames: usize, gain: f32) -> usize {
        self.with(|_, b| {
            let n = frames.min(b.capture_avail);
            b.capture_avail -= n;
            if n > 0 {
                b.captured.push((n, gain));
            }
            n
        })
        .unwrap_or(0)
    }

    fn wake_time(
        &mut self,
        level: usize,
        level_ts: Duration,
        cap_limit: usize,
        is_limiting: bool,
    ) -> Result<WakeTime, StreamError> {
        self.with(|st, b| {
            b.wake_args = Some((level, level_ts, cap_limit, is_limiting));
            b.posts_before_wake = Some(st.update_rstream_calls);
            if b.wake_error {
                Err(StreamError::Wake)
            } else {
                Ok(b.wake_time)
            }
        })
        .unwrap_or(Err(StreamError::Wake))
    }

    fn set_dev_rate(
        &mut self,
        dev_rate: u32,
        dev_rate_ratio: f64,
        master_rate_ratio: f64,
        coarse_rate_adjust: i32,
    ) {
        self.with(|_, b| {
            b.dev_rate = Some((dev_rate, dev_rate_ratio, master_rate_ratio, coarse_rate_adjust));
        });
    }

    fn longest_fetch_interval(&self) -> Duration {
        self.state.lock().longest_fetch_interval
    }

    fn sleep_interval(&self) -> Duration {
        self.state.lock().sleep_interval
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Shared log written by [`RecordingMetrics`].
pub type MetricLog = Arc<Mutex<Vec<MetricRecord>>>;

/// Sink that appends every metric to a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    log: MetricLog,
}

impl RecordingMetrics {
    /// A sink and the log it writes to.
    pub fn new() -> (Self, MetricLog) {
        let sink = Self::default();
        let log = Arc::clone(&sink.log);
        (sink, log)
    }

    fn push(&self, record: MetricRecord) {
        self.log.lock().push(record);
    }
}

impl MetricsSink for RecordingMetrics {
    fn device_runtime(&self, idx: DeviceIdx, direction: Direction, runtime: Duration) {
        self.push(MetricRecord::DeviceRuntime {
            idx,
            direction,
            runtime,
        });
    }

    fn highest_device_delay(&self, hw_level: usize, largest_cb_level: usize, direction: Direction) {
        self.push(MetricRecord::HighestDeviceDelay {
            hw_level,
            largest_cb_level,
            direction,
        });
    }

    fn highest_hw_level(&self, hw_level: usize, direction: Direction) {
        self.push(MetricRecord::HighestHwLevel {
            hw_level,
            direction,
        });
    }

    fn longest_fetch_delay(&self, delay_ms: u64) {
        self.push(MetricRecord::LongestFetchDelay(delay_ms));
    }

    fn num_underruns(&self, count: u32) {
        self.push(MetricRecord::NumUnderruns(count));
    }

    fn busyloop(&self, duration: Duration, count: u32) {
        self.push(MetricRecord::Busyloop { duration, count });
    }

    fn thread_event(&self, event: ThreadEvent) {
        self.push(MetricRecord::Event(event));
    }
}
