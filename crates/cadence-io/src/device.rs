//! The hardware device contract.
//!
//! An [`IoDevice`] is one open endpoint owned by the audio thread. The thread
//! only ever talks to hardware through this trait; backends (ALSA, Bluetooth,
//! loopback, the [`sim`](crate::sim) backend) implement it.
//!
//! Buffers are interleaved `f32`. A buffer returned by
//! [`IoDevice::get_output_buffer`] or [`IoDevice::get_input_buffer`] may hold
//! fewer frames than requested when the hardware ring wraps; callers loop.

use std::time::Duration;
use thiserror::Error;

use cadence_core::{DeviceIdx, Direction};

/// Errors reported by a device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The hardware fell so far behind that it had to be restarted.
    #[error("severe underrun")]
    SevereUnderrun,

    /// The device was used while closed.
    #[error("device is not open")]
    NotOpen,

    /// A request did not fit the device's buffer or format.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Backend I/O failure.
    #[error("device I/O failed: {0}")]
    Io(String),
}

/// Run state of an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Closed.
    Close,
    /// Opened but not started.
    Open,
    /// Running with at least one stream.
    NormalRun,
    /// Running with no streams; the device fills its own silence.
    NoStreamRun,
}

/// Kind of the device's active node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Speaker, headphone, internal or USB microphone and so on.
    Normal,
    /// Always-on hotword detector. Never dropped from or rate limited.
    Hotword,
    /// Loopback of the post-mix output.
    Loopback,
}

/// Sample format of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Frames per second.
    pub frame_rate: u32,
    /// Interleaved channels per frame.
    pub num_channels: usize,
}

impl AudioFormat {
    /// Create a format.
    pub fn new(frame_rate: u32, num_channels: usize) -> Self {
        Self {
            frame_rate,
            num_channels,
        }
    }

    /// Channel count, never zero, for slicing interleaved buffers.
    #[inline]
    pub fn stride(&self) -> usize {
        self.num_channels.max(1)
    }
}

/// Hardware fill level with the time it was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueuedFrames {
    /// Frames queued in the hardware buffer.
    pub frames: usize,
    /// When the level was sampled, if the backend knows.
    pub timestamp: Option<Duration>,
}

/// One open audio device.
pub trait IoDevice: Send {
    /// Device index.
    fn idx(&self) -> DeviceIdx;

    /// Whether this device plays or captures.
    fn direction(&self) -> Direction;

    /// Human-readable name for logs and dumps.
    fn name(&self) -> &str {
        ""
    }

    /// Current buffer format.
    fn format(&self) -> AudioFormat;

    /// Hardware buffer size in frames.
    fn buffer_size(&self) -> usize;

    /// Smallest callback threshold among the device's running streams.
    fn min_cb_level(&self) -> usize;

    /// Largest callback threshold among the device's running streams.
    fn max_cb_level(&self) -> usize;

    /// Largest callback threshold ever attached to the device.
    fn largest_cb_level(&self) -> usize;

    /// Frames kept queued at all times to absorb scheduling jitter.
    fn min_buffer_level(&self) -> usize {
        0
    }

    /// Gain applied in software when copying captured samples.
    fn software_gain_scaler(&self) -> f32 {
        1.0
    }

    /// Type of the active node, `None` when no node is selected.
    fn active_node(&self) -> Option<NodeType> {
        Some(NodeType::Normal)
    }

    /// Underruns seen since the device opened.
    fn num_underruns(&self) -> u32 {
        0
    }

    /// Whether the device is open.
    fn is_open(&self) -> bool;

    /// Current run state.
    fn state(&self) -> DeviceState;

    /// Frames queued in hardware plus the sampling time.
    fn frames_queued(&mut self) -> Result<QueuedFrames, DeviceError>;

    /// Frames of valid data queued, excluding padding the backend added.
    fn valid_frames(&mut self) -> Result<usize, DeviceError> {
        Ok(self.frames_queued()?.frames)
    }

    /// Total device latency in frames.
    fn delay_frames(&mut self) -> Result<usize, DeviceError>;

    /// Borrow up to `frames` writable frames of the output ring.
    ///
    /// The slice length divided by the channel count is the number of frames
    /// granted.
    fn get_output_buffer(&mut self, frames: usize) -> Result<&mut [f32], DeviceError>;

    /// Commit `frames` frames from the last output buffer.
    ///
    /// When `non_empty` is given the device sets it to `true` if any committed
    /// sample is non-zero. It never clears the flag.
    fn put_output_buffer(
        &mut self,
        frames: usize,
        non_empty: Option<&mut bool>,
    ) -> Result<(), DeviceError>;

    /// Borrow up to `frames` readable frames of the input ring.
    fn get_input_buffer(&mut self, frames: usize) -> Result<&[f32], DeviceError>;

    /// Release `frames` frames of the last input buffer back to hardware.
    ///
    /// Returns the frames actually consumed.
    fn put_input_buffer(&mut self, frames: usize) -> Result<usize, DeviceError>;

    /// Hook run before every playback write, e.g. to fill silence when idle.
    fn prepare_output_before_write(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Whether the device itself needs the thread to wake for it.
    fn should_wake(&self) -> bool;

    /// Feed a level sample to the rate estimator.
    ///
    /// Returns `true` when the estimated rate changed.
    fn update_rate(&mut self, _level: usize, _timestamp: Duration) -> bool {
        false
    }

    /// Estimated hardware rate divided by the nominal rate.
    fn est_rate_ratio(&self) -> f64 {
        1.0
    }

    /// Handle an underrun detected by the thread.
    fn output_underrun(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Reset after a severe error.
    fn reset_on_error(&mut self);

    /// Discard `duration` worth of captured frames.
    fn drop_frames_by_time(&mut self, duration: Duration) -> Result<usize, DeviceError>;

    /// Discard everything queued. Returns the frames discarded.
    fn flush_buffer(&mut self) -> Result<usize, DeviceError>;
}
