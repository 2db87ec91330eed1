//! Cadence Core - timing primitives for the audio I/O thread
//!
//! This crate holds the small, dependency-free building blocks that the
//! scheduling engine in `cadence-io` is written against. Everything here is
//! pure arithmetic or plain data, so it can be tested without threads,
//! devices, or real sleeps.
//!
//! # Contents
//!
//! ## Time
//!
//! - [`Clock`] - Source of monotonic timestamps
//! - [`MonotonicClock`] - `Instant`-backed clock used by the audio thread
//! - [`ManualClock`] - Shared, manually advanced clock for tests and simulation
//!
//! ## Tick-driven timers
//!
//! - [`TickSnapshot`] - The "now" observed by one scheduler tick
//! - [`PolledInterval`] - Timer that only sees time move when the snapshot is refreshed
//!
//! ## Frame arithmetic
//!
//! - [`frames_to_time`], [`frames_to_time_precise`], [`frames_to_ms`],
//!   [`time_to_frames`], [`frames_at_rate`]
//!
//! ## Identity
//!
//! - [`DeviceIdx`], [`StreamId`], [`Direction`]
//!
//! # Example
//!
//! ```rust
//! use cadence_core::{ManualClock, PolledInterval, TickSnapshot};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new(Duration::from_secs(1000));
//! let mut snapshot = TickSnapshot::new(&clock);
//! let interval = PolledInterval::new(Duration::from_secs(5), &snapshot);
//!
//! clock.set(Duration::from_secs(1100));
//! assert!(!interval.elapsed(&snapshot)); // snapshot not refreshed yet
//!
//! snapshot.update(&clock);
//! assert!(interval.elapsed(&snapshot));
//! ```

pub mod clock;
pub mod defaults;
pub mod frames;
pub mod ids;
pub mod polled_interval;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use frames::{frames_at_rate, frames_to_ms, frames_to_time, frames_to_time_precise, time_to_frames};
pub use ids::{DeviceIdx, Direction, StreamId};
pub use polled_interval::{PolledInterval, TickSnapshot};
