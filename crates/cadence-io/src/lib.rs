//! Audio I/O thread for the cadence audio server.
//!
//! This crate provides:
//!
//! - **Device and stream contracts**: [`IoDevice`], [`ClientStream`] and
//!   [`DevStream`] describe what the thread needs from hardware backends and
//!   client streams
//! - **Scheduling engine**: [`Scheduler`] owns the open-device registry and
//!   runs one tick of fetch, capture, send, write and monitoring work
//! - **Thread driver**: [`AudioThread`] runs the scheduler on a named OS thread
//!   and serves control commands between ticks
//! - **Simulation backend**: the `sim` module (behind the `sim` feature)
//!   holds scripted devices and streams for tests, benches and CI
//!
//! ## Tick order
//!
//! | Step | Work |
//! |------|------|
//! | 1 | refresh the [`TickSnapshot`](cadence_core::TickSnapshot) |
//! | 2 | record the longest gap between ticks per device |
//! | 3 | start due playback streams, request samples from clients |
//! | 4 | read input hardware into capture streams |
//! | 5 | post captured samples, drop stale capture latency |
//! | 6 | mix playback streams into output hardware |
//! | 7 | update the non-empty device count |
//!
//! ## Quick Start
//!
//! ```rust
//! use cadence_config::ThreadConfig;
//! use cadence_core::{DeviceIdx, Direction, ManualClock, StreamId};
//! use cadence_io::Scheduler;
//! use cadence_io::sim::{SimDevice, SimStream};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new(Duration::from_secs(1));
//! let mut scheduler = Scheduler::new(ThreadConfig::default(), Box::new(clock.clone()));
//!
//! let (device, _dev) = SimDevice::output(DeviceIdx(1), 48_000, 2);
//! scheduler.add_open_dev(Box::new(device))?;
//!
//! let (stream, client) = SimStream::new(StreamId(7), Direction::Output, 480, 48_000);
//! client.lock().auto_reply = true;
//! scheduler.append_stream(&stream, &[DeviceIdx(1)])?;
//!
//! // The stream is started, fetched and mixed; its next callback is 10ms out.
//! scheduler.run();
//! assert_eq!(scheduler.next_sleep(), Some(Duration::from_millis(10)));
//! # Ok::<(), cadence_io::Error>(())
//! ```

mod attach;
mod capture;
mod device;
mod dump;
mod metrics;
mod monitor;
mod open_dev;
mod playback;
mod scheduler;
mod stream;
mod thread;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use device::{AudioFormat, DeviceError, DeviceState, IoDevice, NodeType, QueuedFrames};
pub use dump::{DeviceSnapshot, StreamSnapshot, ThreadSnapshot};
pub use metrics::{MetricRecord, MetricsSink, NoopMetrics, ThreadEvent, TracingMetrics};
pub use monitor::{NonEmptyNotifier, ThreadCounters};
pub use scheduler::Scheduler;
pub use stream::{BindTarget, ClientStream, DevStream, StreamError, StreamFlags, WakeTime};
pub use thread::{AudioThread, AudioThreadHandle, ThreadWaker};

use cadence_core::{DeviceIdx, StreamId};

/// Error types for audio thread operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device with this index is already open in its direction.
    #[error("Device {0} is already open")]
    DeviceAlreadyOpen(DeviceIdx),

    /// A device operation failed.
    #[error("Device {idx} failed: {source}")]
    Device {
        /// Device that failed.
        idx: DeviceIdx,
        /// What the device reported.
        #[source]
        source: DeviceError,
    },

    /// A stream operation failed.
    #[error("Stream {id} failed: {source}")]
    Stream {
        /// Stream that failed.
        id: StreamId,
        /// What the stream reported.
        #[source]
        source: StreamError,
    },

    /// The audio thread has exited and can no longer take commands.
    #[error("Audio thread is not running")]
    ThreadGone,

    /// The OS refused to start the audio thread.
    #[error("Failed to spawn audio thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl Error {
    /// Wrap a device failure.
    pub fn device(idx: DeviceIdx, source: DeviceError) -> Self {
        Error::Device { idx, source }
    }

    /// Wrap a stream failure.
    pub fn stream(id: StreamId, source: StreamError) -> Self {
        Error::Stream { id, source }
    }
}

/// Convenience result type for audio thread operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn device_error_display_names_device() {
        let err = Error::device(DeviceIdx(3), DeviceError::SevereUnderrun);
        assert_eq!(err.to_string(), "Device dev3 failed: severe underrun");
        assert!(err.source().is_some());
    }

    #[test]
    fn stream_error_display_names_stream() {
        let err = Error::stream(StreamId(0x20), StreamError::Mix);
        assert!(err.to_string().starts_with("Stream 0x20 failed"));
    }
}
