//! Configuration for the cadence audio I/O thread.
//!
//! The scheduling engine runs with a handful of tunables: how early playback
//! streams may be fetched, how long the thread may sleep, when queued capture
//! audio is considered stale, and the timings of silence detection. This crate
//! defines them as a serde-backed [`ThreadConfig`] that can be read from and
//! written to TOML.
//!
//! # Features
//!
//! - **Defaults**: [`ThreadConfig::default`] reproduces the built-in constants
//!   from [`cadence_core::defaults`]
//! - **TOML files**: [`ThreadConfig::load`], [`ThreadConfig::save`], [`ThreadConfig::from_toml`]
//! - **Validation**: [`ThreadConfig::validate`] rejects values that would stall or spin the thread
//! - **Paths**: Platform-specific config locations, overridable with `CADENCE_CONFIG`
//!
//! # Example
//!
//! ```rust
//! use cadence_config::ThreadConfig;
//! use std::time::Duration;
//!
//! let config = ThreadConfig::from_toml(r#"
//!     thread_name = "audio"
//!     drop_frames_threshold_ms = 80
//! "#).unwrap();
//!
//! assert_eq!(config.drop_frames_threshold_ms, 80);
//! assert_eq!(config.max_sleep(), Duration::from_secs(20));
//! ```

mod error;
mod thread_config;

/// Platform-specific paths for configuration files.
pub mod paths;

/// Range checks for thread tunables.
pub mod validation;

pub use error::{ConfigError, FileOp};
pub use paths::{CONFIG_ENV, default_config_path, ensure_user_config_dir, user_config_dir};
pub use thread_config::ThreadConfig;
pub use validation::{ValidationError, validate_config};
