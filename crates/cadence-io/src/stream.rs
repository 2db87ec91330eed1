//! The client stream contract.
//!
//! A [`ClientStream`] is what a client registered with the server. Attaching
//! it to a device creates one [`DevStream`] binding per device; the binding
//! owns the per-device resampling and offset state and is dropped when the
//! stream leaves that device.

use bitflags::bitflags;
use std::time::Duration;
use thiserror::Error;

use cadence_core::{DeviceIdx, Direction, StreamId};

use crate::device::AudioFormat;

/// Errors reported by a stream binding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Requesting samples from the client failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The shared buffer reported an impossible frame count.
    #[error("invalid frame count")]
    Frames,

    /// Mixing into the device buffer failed.
    #[error("mix failed")]
    Mix,

    /// Computing the next wake time failed.
    #[error("wake time unavailable")]
    Wake,

    /// Creating the binding for a device failed.
    #[error("bind failed: {0}")]
    Bind(String),
}

bitflags! {
    /// Stream behaviour flags, as set by the client.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct StreamFlags: u32 {
        /// The stream only wants to know that capture started.
        const TRIGGER_ONLY = 1 << 2;
    }
}

/// When a capture binding next needs the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeTime {
    /// Wake at this time.
    At(Duration),
    /// The binding does not constrain the next wake.
    NotNeeded,
}

/// Where a binding is being attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTarget {
    /// Device the binding belongs to.
    pub idx: DeviceIdx,
    /// Device buffer format.
    pub format: AudioFormat,
    /// First callback time. `None` for capture, where the hardware level
    /// drives callbacks.
    pub init_cb_ts: Option<Duration>,
}

/// A stream as registered by a client.
pub trait ClientStream: Send {
    /// Unique stream id.
    fn id(&self) -> StreamId;

    /// Whether the stream plays or captures.
    fn direction(&self) -> Direction;

    /// Frames per client callback.
    fn cb_threshold(&self) -> usize;

    /// Client sample rate.
    fn frame_rate(&self) -> u32;

    /// Create the per-device binding.
    fn bind(&self, target: &BindTarget) -> Result<Box<dyn DevStream>, StreamError>;
}

/// A stream's binding to one open device.
pub trait DevStream: Send {
    /// Id of the owning stream.
    fn stream_id(&self) -> StreamId;

    /// Behaviour flags of the owning stream.
    fn flags(&self) -> StreamFlags {
        StreamFlags::empty()
    }

    /// Frames per client callback.
    fn cb_threshold(&self) -> usize;

    /// Client sample rate.
    fn frame_rate(&self) -> u32;

    /// Whether the binding takes part in mixing and capture.
    fn is_running(&self) -> bool;

    /// Mark the binding running.
    fn start(&mut self);

    /// Next client callback time, if scheduled.
    fn next_cb_ts(&self) -> Option<Duration>;

    /// Whether a sample request is waiting for the client's reply.
    fn is_pending_reply(&self) -> bool;

    /// Drain stale client acknowledgements.
    fn flush_stale_acks(&mut self);

    /// Record the time a fetch reply was observed.
    fn record_fetch_interval(&mut self, _now: Duration) {}

    /// Frames queued in the shared client buffer. Negative on corruption.
    fn shm_frames(&self) -> i64;

    /// Whether the shared buffer has room for another callback.
    fn can_fetch(&self) -> bool;

    /// Push the next callback time forward without fetching.
    fn update_next_wake_time(&mut self);

    /// Whether the stream is draining out.
    fn is_draining(&self) -> bool;

    /// Set the draining flag.
    fn set_draining(&mut self, draining: bool);

    /// Latency reported to the client, in device frames.
    fn set_delay(&mut self, frames: usize);

    /// Ask the client for more samples.
    fn request_playback_samples(&mut self, now: Duration) -> Result<(), StreamError>;

    /// Refresh the frame count from the shared buffer.
    fn update_frames(&mut self);

    /// Devices the owning stream is bound to.
    fn attached_device_count(&self) -> usize;

    /// Frames ready to be mixed into this device.
    fn playback_frames(&self) -> Result<usize, StreamError>;

    /// Add up to `frames` frames into `dst`. Returns frames mixed.
    fn mix(
        &mut self,
        format: &AudioFormat,
        dst: &mut [f32],
        frames: usize,
    ) -> Result<usize, StreamError>;

    /// Publish buffer progress to the client.
    fn update_rstream(&mut self);

    /// Frames of capture space left in the shared buffer.
    fn capture_avail(&self) -> usize;

    /// Check and log a capture overrun. Returns `true` when one occurred.
    fn check_write_overrun(&mut self) -> bool {
        false
    }

    /// Whether a trigger-only stream has already fired.
    fn is_triggered(&self) -> bool {
        false
    }

    /// Whether audio processing runs on this stream.
    fn has_active_apm(&self) -> bool {
        false
    }

    /// Copy captured frames from `src`, applying `gain`. Returns frames taken.
    fn capture(&mut self, src: &[f32], frames: usize, gain: f32) -> usize;

    /// Next time this capture binding needs the thread.
    ///
    /// `is_limiting` is set on the binding whose free space set `cap_limit`.
    fn wake_time(
        &mut self,
        level: usize,
        level_ts: Duration,
        cap_limit: usize,
        is_limiting: bool,
    ) -> Result<WakeTime, StreamError>;

    /// Propagate the device rate estimate.
    fn set_dev_rate(
        &mut self,
        _dev_rate: u32,
        _dev_rate_ratio: f64,
        _master_rate_ratio: f64,
        _coarse_rate_adjust: i32,
    ) {
    }

    /// Longest time the client took to answer a fetch.
    fn longest_fetch_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Nominal time between client callbacks.
    fn sleep_interval(&self) -> Duration {
        Duration::ZERO
    }
}
