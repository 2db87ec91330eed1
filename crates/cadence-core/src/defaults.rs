//! Default scheduling constants.
//!
//! These are the values the audio thread uses unless a `ThreadConfig`
//! overrides them.

use std::time::Duration;

/// Upper bound on any single sleep of the audio thread.
pub const MAX_SLEEP: Duration = Duration::from_secs(20);

/// How early a playback stream may be fetched before its callback time.
pub const PLAYBACK_WAKE_FUZZ: Duration = Duration::from_micros(500);

/// Input latency (in milliseconds) above which queued capture frames are dropped.
pub const DROP_FRAMES_THRESHOLD_MS: u64 = 50;

/// Shortest device-level sleep for an input device.
///
/// Devices with tiny periods would otherwise make the thread spin.
pub const MIN_INPUT_WAKE: Duration = Duration::from_millis(5);

/// Period between silence scans on an output device that is producing audio.
pub const NON_EMPTY_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// How long an output device must stay silent before it counts as empty.
pub const MIN_EMPTY_PERIOD: Duration = Duration::from_secs(30);

/// Number of consecutive zero-length sleeps that constitutes a busy loop.
pub const MAX_CONTINUOUS_ZERO_SLEEP_COUNT: u32 = 2;
