//! Frame and time arithmetic.
//!
//! Every scheduling decision in the audio thread ends up converting between a
//! number of frames sitting in some buffer and the wall time it takes a device
//! to play or record them. These helpers keep that conversion in one place.
//!
//! All functions treat a zero rate as "no time passes" and return zero rather
//! than dividing by zero.

use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Duration of `frames` at `rate` Hz, truncated to whole nanoseconds.
///
/// ```rust
/// use cadence_core::frames_to_time;
/// use std::time::Duration;
///
/// assert_eq!(frames_to_time(480, 48000), Duration::from_millis(10));
/// ```
pub fn frames_to_time(frames: usize, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let rate = u64::from(rate);
    let frames = frames as u64;
    let secs = frames / rate;
    let nanos = (frames % rate) * NANOS_PER_SEC / rate;
    Duration::new(secs, nanos as u32)
}

/// Duration of `frames` at a fractional rate.
///
/// Used with estimated device rates (nominal rate times the drift ratio).
pub fn frames_to_time_precise(frames: usize, rate: f64) -> Duration {
    if !(rate > 0.0) || !rate.is_finite() {
        return Duration::ZERO;
    }
    let nanos = (frames as f64 * NANOS_PER_SEC as f64 / rate).round();
    Duration::from_nanos(nanos as u64)
}

/// Whole milliseconds taken by `frames` at `rate` Hz, truncated.
pub fn frames_to_ms(frames: usize, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    frames as u64 * 1000 / u64::from(rate)
}

/// Number of whole frames at `rate` Hz that fit in `duration`.
pub fn time_to_frames(duration: Duration, rate: u32) -> usize {
    (duration.as_nanos() * u128::from(rate) / u128::from(NANOS_PER_SEC)) as usize
}

/// Convert a frame count between sample rates, rounding up.
///
/// ```rust
/// use cadence_core::frames_at_rate;
///
/// // 441 frames at 44.1 kHz is 480 frames at 48 kHz.
/// assert_eq!(frames_at_rate(44100, 441, 48000), 480);
/// ```
pub fn frames_at_rate(from_rate: u32, frames: usize, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    let from = u64::from(from_rate);
    ((frames as u64 * u64::from(to_rate) + from - 1) / from) as usize
}
